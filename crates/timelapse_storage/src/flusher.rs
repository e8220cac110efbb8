//! Background idle flushing.
//!
//! Appends never wait for durable I/O unless a queue hits its threshold.
//! The [`IdleFlusher`] persists whatever has been sitting in a queue for
//! longer than the idle interval, and flushes everything one last time on
//! shutdown.

use crate::error::StoreResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Something with a pending queue that can be persisted
pub trait Flushable: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Persist queued rows, returning how many were written
    ///
    /// # Errors
    ///
    /// Returns error if the durable write fails
    fn flush(&self) -> StoreResult<usize>;

    /// How long the queue has been idle, if anything is queued
    fn idle_for(&self) -> Option<Duration>;
}

/// Periodically flushes idle queues on a tokio runtime
pub struct IdleFlusher {
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl IdleFlusher {
    /// Start flushing `targets` once they have been idle for `idle`
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(targets: Vec<Arc<dyn Flushable>>, idle: Duration) -> Self {
        let stop = Arc::new(Notify::new());
        let signal = Arc::clone(&stop);
        let tick = idle.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = signal.notified() => break,
                    () = tokio::time::sleep(tick) => {
                        let due: Vec<Arc<dyn Flushable>> = targets
                            .iter()
                            .filter(|t| t.idle_for().is_some_and(|elapsed| elapsed >= idle))
                            .cloned()
                            .collect();
                        if !due.is_empty() {
                            flush_blocking(due).await;
                        }
                    }
                }
            }
            flush_blocking(targets).await;
        });

        Self { stop, handle }
    }

    /// Stop the flusher after one final flush of every target
    pub async fn shutdown(self) {
        self.stop.notify_one();
        if let Err(err) = self.handle.await {
            warn!(error = %err, "idle flusher task ended abnormally");
        }
    }
}

async fn flush_blocking(targets: Vec<Arc<dyn Flushable>>) {
    let result = tokio::task::spawn_blocking(move || {
        for target in &targets {
            match target.flush() {
                Ok(0) => {}
                Ok(rows) => debug!(table = target.name(), rows, "idle flush"),
                // The table logs and poisons itself; keep serving the others.
                Err(err) => warn!(table = target.name(), error = %err, "idle flush failed"),
            }
        }
    })
    .await;
    if let Err(err) = result {
        warn!(error = %err, "idle flush task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::SessionDb;
    use crate::table::{Row, TieredTable};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Entry {
        id: u64,
    }

    impl Row for Entry {
        fn row_id(&self) -> u64 {
            self.id
        }
    }

    fn table() -> Arc<TieredTable<Entry>> {
        let db = SessionDb::in_memory().unwrap();
        Arc::new(TieredTable::new(db.dom_changes(), 0))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_idle_rows_are_flushed() {
        let table = table();
        table.upsert(Entry { id: 1 }).unwrap();

        let flusher = IdleFlusher::spawn(vec![table.clone() as Arc<dyn Flushable>], Duration::from_millis(10));
        for _ in 0..200 {
            if table.pending_len() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(table.pending_len(), 0);
        assert_eq!(table.get(1).unwrap(), Some(Entry { id: 1 }));
        flusher.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_flushes_everything() {
        let table = table();
        let flusher = IdleFlusher::spawn(vec![table.clone() as Arc<dyn Flushable>], Duration::from_secs(3600));
        table.upsert(Entry { id: 7 }).unwrap();
        assert_eq!(table.pending_len(), 1);

        flusher.shutdown().await;
        assert_eq!(table.pending_len(), 0);
        assert_eq!(table.stats().flushed_rows, 1);
    }
}
