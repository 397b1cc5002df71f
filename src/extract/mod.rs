//! Extraction pipelines: one forward pass over a markup stream, observed
//! through selector subscriptions and correlated into typed records.
//!
//! Every pass owns an isolated accumulator/boundary-state/bridge triple.
//! The producer side runs on a blocking thread: it pulls raw chunks from the
//! byte source, feeds them to the rewriter, and hands sealed records to the
//! consumer through the capacity-1 bridge. The rewriter's selector handlers
//! are the only place records are built; `pump` is the only loop that drives
//! them.

pub(crate) mod listings;
pub(crate) mod profile;
pub(crate) mod thread;

use lol_html::errors::RewritingError;
use lol_html::{HtmlRewriter, OutputSink};
use tokio::sync::mpsc;

use crate::bridge::{self, Cancelled, ContinuationCell, Handoff, RecordStream};
use crate::client::{ByteChunk, ByteSource};
use crate::error::ExtractError;

/// How a markup pass ended.
pub(crate) enum PumpEnd {
    /// Input exhausted; the pipeline still has to seal any pending record and
    /// resolve the continuation.
    Completed,
    /// The consumer hung up; nothing further is emitted.
    Cancelled,
    /// Transport or rewriter failure; the pipeline delivers the sentinel and
    /// discards whatever was under construction.
    Failed(ExtractError),
}

/// Spawn one extraction pass: a blocking producer driving `drive`, bridged to
/// the returned pull stream. The byte-source task is reaped with the pass.
pub(crate) fn spawn_pass<T, F>(source: ByteSource, drive: F) -> RecordStream<T>
where
    T: Send + 'static,
    F: FnOnce(mpsc::Receiver<ByteChunk>, Handoff<T>, ContinuationCell) + Send + 'static,
{
    let ByteSource { rx, task } = source;
    let (handoff, cell, pending) = bridge::channel(vec![task]);
    let producer = tokio::task::spawn_blocking(move || drive(rx, handoff, cell));
    pending.attach(producer)
}

/// Feed the byte source through the rewriter until it completes, fails, or
/// the consumer cancels. Blocking; runs on the producer thread.
pub(crate) fn pump<O: OutputSink>(
    bytes: &mut mpsc::Receiver<ByteChunk>,
    mut rewriter: HtmlRewriter<'_, O>,
) -> PumpEnd {
    loop {
        match bytes.blocking_recv() {
            Some(Ok(chunk)) => match rewriter.write(&chunk) {
                Ok(()) => {}
                Err(RewritingError::ContentHandlerError(e)) if e.is::<Cancelled>() => {
                    return PumpEnd::Cancelled;
                }
                Err(e) => return PumpEnd::Failed(ExtractError::Markup(e.to_string())),
            },
            Some(Err(e)) => return PumpEnd::Failed(e),
            None => {
                return match rewriter.end() {
                    Ok(()) => PumpEnd::Completed,
                    Err(RewritingError::ContentHandlerError(e)) if e.is::<Cancelled>() => {
                        PumpEnd::Cancelled
                    }
                    Err(e) => PumpEnd::Failed(ExtractError::Markup(e.to_string())),
                };
            }
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use crate::client::testing::fixture_source;
    use crate::models::Listing;

    async fn collect_front(chunk_size: usize) -> (Vec<Listing>, String) {
        let html = std::fs::read_to_string("tests/fixtures/front.html").unwrap();
        let mut stream = super::listings::spawn(fixture_source(&html, chunk_size));
        let mut records = Vec::new();
        while let Some(item) = stream.recv().await {
            records.push(item.unwrap());
        }
        (records, stream.continuation().await)
    }

    async fn collect_thread_ids(chunk_size: usize) -> Vec<u64> {
        let html = std::fs::read_to_string("tests/fixtures/thread.html").unwrap();
        let mut thread = super::thread::open(fixture_source(&html, chunk_size))
            .await
            .unwrap();
        let mut ids = vec![thread.header.id];
        while let Some(item) = thread.comments.recv().await {
            ids.push(item.unwrap().id);
        }
        ids
    }

    #[tokio::test]
    async fn concurrent_passes_match_sequential_runs() {
        let front_seq = collect_front(64).await;
        let thread_seq = collect_thread_ids(64).await;

        let (front_conc, thread_conc) = tokio::join!(collect_front(64), collect_thread_ids(64));

        assert_eq!(front_conc, front_seq);
        assert_eq!(thread_conc, thread_seq);
    }
}
