//! Background saving of the session state.
//!
//! Operations hand their latest snapshot to the [`Persister`] and move on.
//! A single writer task waits for the debounce interval, then writes
//! whatever snapshot is newest, so a burst of changes is one write
//! and writes never overlap.

use std::time::Duration;

use ql_core::{err, json_store::JsonStore};
use tokio::sync::watch;

use crate::SessionState;

#[derive(Default)]
struct Snapshot {
    generation: u64,
    state: Option<SessionState>,
}

pub struct Persister {
    queue: watch::Sender<Snapshot>,
    written: watch::Receiver<u64>,
}

impl Persister {
    /// Starts the writer task. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(store: JsonStore<SessionState>, debounce: Duration) -> Self {
        let (queue, mut pending) = watch::channel(Snapshot::default());
        let (written_tx, written) = watch::channel(0_u64);

        // Exits once `queue` is dropped and the last snapshot is written
        tokio::spawn(async move {
            while pending.changed().await.is_ok() {
                if !debounce.is_zero() {
                    tokio::time::sleep(debounce).await;
                }
                let (generation, state) = {
                    let snapshot = pending.borrow_and_update();
                    (snapshot.generation, snapshot.state.clone())
                };
                if let Some(state) = state {
                    if let Err(error) = store.write(&state).await {
                        err!("Couldn't save accounts to {:?}: {error}", store.path());
                    }
                }
                // Also on failure, so flush() doesn't hang
                _ = written_tx.send(generation);
            }
        });

        Self { queue, written }
    }

    /// Schedules `state` to be written, replacing any
    /// snapshot that wasn't written yet.
    pub fn enqueue(&self, state: SessionState) {
        self.queue.send_modify(|snapshot| {
            snapshot.generation += 1;
            snapshot.state = Some(state);
        });
    }

    /// Waits until everything enqueued so far was written (or failed to).
    pub async fn flush(&self) {
        let target = self.queue.borrow().generation;
        let mut written = self.written.clone();
        if written.wait_for(|n| *n >= target).await.is_err() {
            err!("Account save task stopped, latest changes may be lost");
        }
    }
}
