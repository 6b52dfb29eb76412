//! Polling queue consumer.
//!
//! A message is claimed for the visibility timeout, handed to a
//! `QueueHandler`, and acked on success. On failure it is left alone and
//! becomes visible again once the timeout passes, until it has been received
//! `max_receives` times; then it is dead-lettered with the last error.
//! Bodies that are not valid JSON for the handler are dead-lettered at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{DatabaseError, PipelineError};
use crate::store::WorkQueue;

/// Processes one queue message body.
#[async_trait]
pub trait QueueHandler: Send + Sync {
    /// An `Err` leaves the message for redelivery, except
    /// `PipelineError::Json`, which dead-letters it.
    async fn handle(&self, body: &str) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Sleep between polls while the queue is empty.
    pub poll_interval: Duration,
    /// How long a claimed message stays hidden from other receivers.
    pub visibility_timeout: Duration,
    /// Receives allowed before a failing message is dead-lettered.
    pub max_receives: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            visibility_timeout: Duration::from_secs(300),
            max_receives: 5,
        }
    }
}

/// What happened to a claimed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    Acked { id: String },
    /// Left for redelivery after the visibility timeout.
    Released { id: String, error: String },
    DeadLettered { id: String, error: String },
}

/// Claim and process at most one message from `queue_name`.
///
/// Returns `Ok(None)` when nothing is visible.
pub async fn process_next(
    queue: &dyn WorkQueue,
    queue_name: &str,
    handler: &dyn QueueHandler,
    settings: &WorkerSettings,
) -> Result<Option<WorkOutcome>, DatabaseError> {
    let Some(message) = queue.receive(queue_name, settings.visibility_timeout).await? else {
        return Ok(None);
    };
    debug!(
        queue = queue_name,
        id = %message.id,
        receive_count = message.receive_count,
        "Message received"
    );

    let err = match handler.handle(&message.body).await {
        Ok(()) => {
            queue.ack(&message.id).await?;
            return Ok(Some(WorkOutcome::Acked { id: message.id }));
        }
        Err(e) => e,
    };

    let malformed = matches!(err, PipelineError::Json(_));
    let error = err.to_string();

    if malformed || message.receive_count >= settings.max_receives {
        error!(
            queue = queue_name,
            id = %message.id,
            receive_count = message.receive_count,
            error = %error,
            "Message dead-lettered"
        );
        queue.dead_letter(&message.id, &error).await?;
        return Ok(Some(WorkOutcome::DeadLettered {
            id: message.id,
            error,
        }));
    }

    warn!(
        queue = queue_name,
        id = %message.id,
        receive_count = message.receive_count,
        max_receives = settings.max_receives,
        error = %error,
        "Message processing failed, will be redelivered"
    );
    Ok(Some(WorkOutcome::Released {
        id: message.id,
        error,
    }))
}

/// Spawn a background task that drains `queue_name` with `handler`.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling.
pub fn spawn_queue_worker(
    queue: Arc<dyn WorkQueue>,
    queue_name: &'static str,
    handler: Arc<dyn QueueHandler>,
    settings: WorkerSettings,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            queue = queue_name,
            poll_secs = settings.poll_interval.as_secs_f64(),
            "Queue worker started"
        );

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!(queue = queue_name, "Queue worker shutting down");
                return;
            }

            match process_next(queue.as_ref(), queue_name, handler.as_ref(), &settings).await {
                // Keep draining while there is work.
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(queue = queue_name, error = %e, "Queue poll failed"),
            }

            tokio::time::sleep(settings.poll_interval).await;
        }
    });

    (handle, shutdown_flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use std::sync::atomic::AtomicUsize;

    /// Fails the first `failures` calls, then succeeds.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl QueueHandler for Flaky {
        async fn handle(&self, body: &str) -> Result<(), PipelineError> {
            let _: serde_json::Value = serde_json::from_str(body)?;
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(PipelineError::Extraction {
                    key: "test".into(),
                    reason: format!("failure {}", n + 1),
                })
            } else {
                Ok(())
            }
        }
    }

    fn immediate(max_receives: u32) -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(10),
            visibility_timeout: Duration::ZERO,
            max_receives,
        }
    }

    #[tokio::test]
    async fn empty_queue_returns_none() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let out = process_next(&db, "forwards", &Flaky::new(0), &immediate(3))
            .await
            .unwrap();
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn success_acks_message() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let id = db.enqueue("forwards", "{}").await.unwrap();

        let out = process_next(&db, "forwards", &Flaky::new(0), &immediate(3))
            .await
            .unwrap();
        assert_eq!(out, Some(WorkOutcome::Acked { id }));
        assert_eq!(db.pending_count("forwards").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failure_is_redelivered_then_succeeds() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.enqueue("forwards", "{}").await.unwrap();
        let handler = Flaky::new(1);
        let settings = immediate(3);

        let first = process_next(&db, "forwards", &handler, &settings)
            .await
            .unwrap();
        assert!(matches!(first, Some(WorkOutcome::Released { .. })));
        assert_eq!(db.pending_count("forwards").await.unwrap(), 1);

        let second = process_next(&db, "forwards", &handler, &settings)
            .await
            .unwrap();
        assert!(matches!(second, Some(WorkOutcome::Acked { .. })));
        assert_eq!(db.pending_count("forwards").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dead_letters_after_max_receives() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.enqueue("replies", "{}").await.unwrap();
        let handler = Flaky::new(usize::MAX);
        let settings = immediate(2);

        let first = process_next(&db, "replies", &handler, &settings)
            .await
            .unwrap();
        assert!(matches!(first, Some(WorkOutcome::Released { .. })));

        let second = process_next(&db, "replies", &handler, &settings)
            .await
            .unwrap();
        match second {
            Some(WorkOutcome::DeadLettered { error, .. }) => {
                assert_eq!(error, "Extraction failed for test: failure 2");
            }
            other => panic!("expected dead letter, got {other:?}"),
        }
        assert_eq!(db.pending_count("replies").await.unwrap(), 0);
        assert_eq!(
            process_next(&db, "replies", &handler, &settings)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn malformed_body_dead_lettered_immediately() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.enqueue("forwards", "not json").await.unwrap();

        let out = process_next(&db, "forwards", &Flaky::new(0), &immediate(5))
            .await
            .unwrap();
        assert!(matches!(out, Some(WorkOutcome::DeadLettered { .. })));
        assert_eq!(db.pending_count("forwards").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn spawned_worker_drains_and_stops() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.enqueue("forwards", "{}").await.unwrap();
        db.enqueue("forwards", "{}").await.unwrap();

        let handler = Arc::new(Flaky::new(0));
        let (handle, shutdown) =
            spawn_queue_worker(db.clone(), "forwards", handler.clone(), immediate(3));

        for _ in 0..200 {
            if db.pending_count("forwards").await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(db.pending_count("forwards").await.unwrap(), 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

        shutdown.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
