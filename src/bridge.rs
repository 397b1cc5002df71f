//! Push-to-pull bridge between the synchronous markup pass and the consumer.
//!
//! The producer side of a pass runs on a blocking thread and seals records
//! synchronously as tag/text events arrive; the consumer pulls them one at a
//! time from an async stream. The two meet on a capacity-1 channel: sealing a
//! record suspends the producer until the consumer has taken it, so a slow
//! consumer never causes unbounded buffering, and records arrive in strict
//! document order with no lookahead beyond one record.
//!
//! Each pass owns its own channel triple; nothing here is shared across
//! passes.

use std::fmt;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::ExtractError;

/// The consumer hung up before the pass completed. A normal termination path,
/// not an error: it propagates through the rewriter as an abort so the
/// producer stops driving parse and network work.
#[derive(Debug)]
pub(crate) struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("consumer cancelled the extraction pass")
    }
}

impl std::error::Error for Cancelled {}

/// Producer handle: hands completed records (or one failure sentinel) to the
/// consumer. Emission blocks the parse thread until the single slot is free.
pub(crate) struct Handoff<T> {
    tx: mpsc::Sender<Result<T, ExtractError>>,
}

// Manual impl: the sender clones for any T, no T: Clone bound.
impl<T> Clone for Handoff<T> {
    fn clone(&self) -> Self {
        Handoff {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Handoff<T> {
    pub(crate) fn emit(&self, record: T) -> Result<(), Cancelled> {
        self.tx.blocking_send(Ok(record)).map_err(|_| Cancelled)
    }

    /// Deliver the failure sentinel. Any record under construction at the
    /// call site has already been discarded, never emitted.
    pub(crate) fn fail(&self, err: ExtractError) {
        let _ = self.tx.blocking_send(Err(err));
    }
}

/// Single-assignment cell for the next-page reference. The first capture
/// wins; resolving without a capture yields the empty token, and dropping the
/// cell unresolved reads as empty on the consumer side, so awaiting the
/// continuation can never hang once the pass has ended.
pub(crate) struct ContinuationCell {
    slot: Option<oneshot::Sender<String>>,
}

impl ContinuationCell {
    pub(crate) fn capture(&mut self, token: String) {
        if let Some(tx) = self.slot.take() {
            let _ = tx.send(token);
        }
    }

    /// Resolve with the empty token if no anchor was ever captured.
    pub(crate) fn resolve(&mut self) {
        self.capture(String::new());
    }
}

/// Consumer side of one extraction pass: a finite, cancellable sequence of
/// records followed by exactly one continuation token.
#[derive(Debug)]
pub struct RecordStream<T> {
    rx: mpsc::Receiver<Result<T, ExtractError>>,
    next_page: oneshot::Receiver<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl<T> RecordStream<T> {
    /// Pull the next record. `None` means the pass completed and the close
    /// signal was delivered; an `Err` item is the pass's single failure
    /// sentinel.
    pub async fn recv(&mut self) -> Option<Result<T, ExtractError>> {
        self.rx.recv().await
    }

    /// Resolve the continuation token, then reap the pass tasks. Intended to
    /// be called once the sequence is drained; calling it earlier cancels the
    /// rest of the pass and resolves with whatever was captured so far.
    pub async fn continuation(self) -> String {
        let RecordStream {
            rx,
            next_page,
            tasks,
        } = self;
        drop(rx);
        let token = next_page.await.unwrap_or_default();
        join_all(tasks).await;
        token
    }

    /// Stop consuming early. The producer observes the hangup on its next
    /// emission, abandons the markup pass, and the fetch task stops reading;
    /// this waits for both to wind down.
    pub async fn cancel(self) {
        let RecordStream { rx, tasks, .. } = self;
        drop(rx);
        join_all(tasks).await;
    }
}

async fn join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        let _ = task.await;
    }
}

/// Wire up one pass: capacity-1 record slot, continuation cell, and the task
/// handles the consumer reaps on teardown.
pub(crate) fn channel<T>(
    tasks: Vec<JoinHandle<()>>,
) -> (Handoff<T>, ContinuationCell, PendingStream<T>) {
    let (tx, rx) = mpsc::channel(1);
    let (next_tx, next_rx) = oneshot::channel();
    (
        Handoff { tx },
        ContinuationCell { slot: Some(next_tx) },
        PendingStream {
            rx,
            next_page: next_rx,
            tasks,
        },
    )
}

/// A `RecordStream` waiting for its producer task handle.
pub(crate) struct PendingStream<T> {
    rx: mpsc::Receiver<Result<T, ExtractError>>,
    next_page: oneshot::Receiver<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl<T> PendingStream<T> {
    pub(crate) fn attach(mut self, producer: JoinHandle<()>) -> RecordStream<T> {
        self.tasks.push(producer);
        RecordStream {
            rx: self.rx,
            next_page: self.next_page,
            tasks: self.tasks,
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn pass<T: Send + 'static>(
        produce: impl FnOnce(Handoff<T>, ContinuationCell) + Send + 'static,
    ) -> RecordStream<T> {
        let (handoff, cell, pending) = channel(Vec::new());
        let producer = tokio::task::spawn_blocking(move || produce(handoff, cell));
        pending.attach(producer)
    }

    #[tokio::test]
    async fn close_without_records() {
        let mut stream = pass::<u32>(|_out, mut next| next.resolve());
        assert!(stream.recv().await.is_none());
        assert_eq!(stream.continuation().await, "");
    }

    #[tokio::test]
    async fn records_in_order_then_token() {
        let mut stream = pass(|out, mut next| {
            for n in 1..=3 {
                out.emit(n).unwrap();
            }
            next.capture("x?next=9".into());
            next.resolve();
        });
        let mut got = Vec::new();
        while let Some(item) = stream.recv().await {
            got.push(item.unwrap());
        }
        assert_eq!(got, vec![1, 2, 3]);
        assert_eq!(stream.continuation().await, "x?next=9");
    }

    #[tokio::test]
    async fn first_capture_wins() {
        let stream = pass::<u32>(|_out, mut next| {
            next.capture("news?p=2".into());
            next.capture("news?p=3".into());
            next.resolve();
        });
        assert_eq!(stream.continuation().await, "news?p=2");
    }

    #[tokio::test]
    async fn failure_sentinel_is_delivered_once() {
        let mut stream = pass(|out, mut next| {
            out.emit(7u32).unwrap();
            out.fail(ExtractError::UpstreamUnavailable("boom".into()));
            next.resolve();
        });
        assert_eq!(stream.recv().await.unwrap().unwrap(), 7);
        assert!(matches!(
            stream.recv().await,
            Some(Err(ExtractError::UpstreamUnavailable(_)))
        ));
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_reaches_the_producer() {
        let (done_tx, done_rx) = oneshot::channel();
        let mut stream = pass(move |out, mut next| {
            let mut emitted = 0u32;
            loop {
                emitted += 1;
                if out.emit(emitted).is_err() {
                    break;
                }
            }
            next.resolve();
            let _ = done_tx.send(emitted);
        });
        assert!(stream.recv().await.is_some());
        stream.cancel().await;
        // The producer observed Cancelled and stopped emitting on its own.
        assert!(done_rx.await.is_ok());
    }

    #[tokio::test]
    async fn dropped_cell_reads_as_empty_token() {
        let stream = pass::<u32>(|_out, next| drop(next));
        assert_eq!(stream.continuation().await, "");
    }
}
