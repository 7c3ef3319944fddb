//! Usage-statistics queue
//!
//! Request paths push [`UsageEvent`]s with a non-blocking `try_send`; a single
//! background worker drains them into the [`UsageReporter`]. When the queue is
//! full the event is dropped and counted, never awaited.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use stowage_core::{UsageEvent, UsageReporter};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Producer side of the usage queue. Cheap to clone.
#[derive(Clone)]
pub struct UsageQueue {
    tx: mpsc::Sender<UsageEvent>,
    dropped: Arc<AtomicU64>,
}

/// Handle of the drain worker.
pub struct UsageWorker {
    handle: JoinHandle<()>,
}

impl UsageQueue {
    /// Create a queue holding at most `capacity` pending events and spawn its
    /// drain worker.
    pub fn spawn(reporter: Arc<dyn UsageReporter>, capacity: usize) -> (Self, UsageWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(Self::worker_loop(reporter, rx));

        tracing::info!(capacity = capacity.max(1), "Usage queue started");

        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            UsageWorker { handle },
        )
    }

    /// Enqueue without waiting. Returns `false` when the event was dropped.
    pub fn push(&self, event: UsageEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    tenant_id = event.tenant_id,
                    channel_id = event.channel_id,
                    bytes_delta = event.bytes_delta,
                    "Usage queue full, dropping event"
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    tenant_id = event.tenant_id,
                    channel_id = event.channel_id,
                    "Usage worker stopped, dropping event"
                );
                false
            }
        }
    }

    /// Events dropped since start.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn worker_loop(reporter: Arc<dyn UsageReporter>, mut rx: mpsc::Receiver<UsageEvent>) {
        while let Some(event) = rx.recv().await {
            let tenant_id = event.tenant_id;
            let channel_id = event.channel_id;
            if let Err(e) = reporter.report(event).await {
                tracing::warn!(
                    error = %e,
                    tenant_id = tenant_id,
                    channel_id = channel_id,
                    "Usage report failed"
                );
            }
        }
        tracing::info!("Usage queue drained, worker stopped");
    }
}

impl UsageWorker {
    /// Wait until every queue handle is dropped and the backlog is reported.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Usage worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::{Notify, Semaphore};

    /// Records events; each report waits for a permit.
    struct GatedReporter {
        events: Mutex<Vec<UsageEvent>>,
        gate: Semaphore,
        started: Notify,
    }

    impl GatedReporter {
        fn new(permits: usize) -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                gate: Semaphore::new(permits),
                started: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl UsageReporter for GatedReporter {
        async fn report(&self, event: UsageEvent) -> Result<(), String> {
            self.started.notify_one();
            let permit = self.gate.acquire().await.map_err(|e| e.to_string())?;
            permit.forget();
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_events_are_reported_in_order() {
        let reporter = GatedReporter::new(100);
        let (queue, worker) = UsageQueue::spawn(reporter.clone(), 16);

        assert!(queue.push(UsageEvent::stored(1, 10, 100)));
        assert!(queue.push(UsageEvent::deleted(1, 10, 100)));
        drop(queue);
        worker.join().await;

        let events = reporter.events.lock().unwrap().clone();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].bytes_delta, 100);
        assert_eq!(events[1].files_delta, -1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let reporter = GatedReporter::new(0);
        let (queue, worker) = UsageQueue::spawn(reporter.clone(), 1);

        assert!(queue.push(UsageEvent::stored(1, 1, 1)));
        // The worker now holds the first event and waits on the gate.
        reporter.started.notified().await;
        assert!(queue.push(UsageEvent::stored(1, 1, 2)));
        assert!(!queue.push(UsageEvent::stored(1, 1, 3)));
        assert_eq!(queue.dropped(), 1);

        reporter.gate.add_permits(10);
        drop(queue);
        worker.join().await;

        let deltas: Vec<i64> = reporter
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.bytes_delta)
            .collect();
        assert_eq!(deltas, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_reporter_errors_do_not_stop_the_worker() {
        struct Failing(Mutex<u32>);

        #[async_trait]
        impl UsageReporter for Failing {
            async fn report(&self, _event: UsageEvent) -> Result<(), String> {
                *self.0.lock().unwrap() += 1;
                Err("statistics store unavailable".to_string())
            }
        }

        let reporter = Arc::new(Failing(Mutex::new(0)));
        let (queue, worker) = UsageQueue::spawn(reporter.clone(), 4);
        queue.push(UsageEvent::stored(1, 1, 1));
        queue.push(UsageEvent::stored(1, 1, 1));
        drop(queue);
        worker.join().await;
        assert_eq!(*reporter.0.lock().unwrap(), 2);
    }
}
