use thiserror::Error;

/// Failure taxonomy for one extraction pass.
///
/// Transport and markup-level failures are fatal to the pass and surface as a
/// single sentinel on the record stream. A malformed individual record is
/// absorbed by the pipelines (logged and skipped) and only appears here when a
/// whole-pass result depends on it, e.g. a profile page with no profile on it.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Network fetch failed or the upstream answered with an error status.
    /// Never retried by the engine.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The markup pass itself failed (rewriter error). Fatal to the pass.
    #[error("markup pass failed: {0}")]
    Markup(String),

    /// A record that must exist could not be assembled.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// Page parameters missing a required anchor or out of range.
    #[error("invalid page parameters: {0}")]
    InvalidParams(&'static str),
}

impl From<reqwest::Error> for ExtractError {
    fn from(e: reqwest::Error) -> Self {
        ExtractError::UpstreamUnavailable(e.to_string())
    }
}
