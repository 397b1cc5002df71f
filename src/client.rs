//! HTTP entry points. The engine itself is stateless across calls; a
//! `Client` only carries the reqwest handle and the base URL, and every
//! fetch spawns an isolated byte-source task for one extraction pass.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ExtractError;
use crate::extract::{listings, profile, thread};
use crate::models::{Listing, PageParams, Profile};

pub const BASE_URL: &str = "https://news.ycombinator.com";

pub(crate) type ByteChunk = Result<Bytes, ExtractError>;

/// One pass's input: a bounded stream of raw markup chunks plus the handle of
/// the task feeding it. Dropping the receiver hangs up on the task, which
/// releases the response body without reading further.
pub(crate) struct ByteSource {
    pub(crate) rx: mpsc::Receiver<ByteChunk>,
    pub(crate) task: JoinHandle<()>,
}

pub struct Client {
    http: reqwest::Client,
    base: String,
}

impl Default for Client {
    fn default() -> Self {
        Client::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Client::with_base(BASE_URL)
    }

    pub fn with_base(base: impl Into<String>) -> Self {
        Client {
            http: reqwest::Client::new(),
            base: base.into(),
        }
    }

    /// Lazy sequence of listings for one page, in document order, followed by
    /// one continuation token. Restartable only via a new call with an
    /// explicit page or continuation parameter.
    pub fn fetch_listings(
        &self,
        params: &PageParams,
    ) -> Result<crate::RecordStream<Listing>, ExtractError> {
        let path = params.listing_path()?;
        Ok(listings::spawn(self.byte_source(&path)))
    }

    /// Header plus a lazily-pulled comment sequence over the same pass.
    /// Transport failures surface here if they hit before the header.
    pub async fn fetch_thread(
        &self,
        id: u64,
        params: &PageParams,
    ) -> Result<thread::Thread, ExtractError> {
        let path = params.thread_path(id)?;
        thread::open(self.byte_source(&path)).await
    }

    /// Single profile record for one user page.
    pub async fn fetch_user_profile(&self, id: &str) -> Result<Profile, ExtractError> {
        let path = format!("user?id={id}");
        profile::fetch(self.byte_source(&path)).await
    }

    fn byte_source(&self, path: &str) -> ByteSource {
        let url = format!("{}/{}", self.base.trim_end_matches('/'), path);
        spawn_fetch(self.http.clone(), url)
    }
}

/// Drive one HTTP response body into a capacity-1 chunk channel. The small
/// capacity keeps network reads in lockstep with the parse thread, so
/// cancelling the pass stops the download within one chunk.
fn spawn_fetch(http: reqwest::Client, url: String) -> ByteSource {
    let (tx, rx) = mpsc::channel(1);
    let task = tokio::spawn(async move {
        debug!(%url, "fetching page");
        let mut resp = match http.get(&url).send().await.and_then(|r| r.error_for_status()) {
            Ok(resp) => resp,
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        };
        loop {
            match resp.chunk().await {
                Ok(Some(chunk)) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        // Consumer cancelled; dropping the response closes
                        // the connection.
                        debug!(%url, "download abandoned");
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            }
        }
    });
    ByteSource { rx, task }
}

// ── Test support ──

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Increments a shared counter for as long as the byte-source task holds
    /// it. Cancellation tests assert the counter returns to baseline.
    pub(crate) struct LivenessGuard(Arc<AtomicUsize>);

    impl LivenessGuard {
        pub(crate) fn new(counter: Arc<AtomicUsize>) -> Self {
            counter.fetch_add(1, Ordering::SeqCst);
            LivenessGuard(counter)
        }
    }

    impl Drop for LivenessGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// A byte source fed from a fixture, split at `chunk_size` boundaries to
    /// exercise chunking-invariance.
    pub(crate) fn fixture_source(html: &str, chunk_size: usize) -> ByteSource {
        counted_fixture_source(html, chunk_size, &Arc::new(AtomicUsize::new(0)))
    }

    pub(crate) fn counted_fixture_source(
        html: &str,
        chunk_size: usize,
        live: &Arc<AtomicUsize>,
    ) -> ByteSource {
        let chunks: Vec<Bytes> = html
            .as_bytes()
            .chunks(chunk_size.max(1))
            .map(Bytes::copy_from_slice)
            .collect();
        let guard = LivenessGuard::new(Arc::clone(live));
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            let _guard = guard;
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        });
        ByteSource { rx, task }
    }

    /// Delivers `prefix`, then fails the transport mid-pass.
    pub(crate) fn failing_source(prefix: &str) -> ByteSource {
        let head = Bytes::copy_from_slice(prefix.as_bytes());
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            if tx.send(Ok(head)).await.is_ok() {
                let _ = tx
                    .send(Err(ExtractError::UpstreamUnavailable(
                        "connection reset".into(),
                    )))
                    .await;
            }
        });
        ByteSource { rx, task }
    }
}
