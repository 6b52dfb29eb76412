//! Step runner: applies each step's failure policy and records outcomes.

use std::fmt::Display;
use std::future::Future;

use tracing::{error, warn};

use crate::error::PipelineError;
use crate::notify::{Alert, Notifier};
use crate::pipeline::types::{FailurePolicy, Step, StepOutcome, StepRecord};

/// Runs the steps of one unit of work.
pub struct StepRunner<'a> {
    notifier: &'a dyn Notifier,
    records: Vec<StepRecord>,
}

impl<'a> StepRunner<'a> {
    pub fn new(notifier: &'a dyn Notifier) -> Self {
        Self {
            notifier,
            records: Vec::new(),
        }
    }

    /// Run a step that must succeed. A failure ends the unit of work.
    pub async fn require<T, E, F>(&mut self, step: Step, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<PipelineError>,
    {
        match fut.await {
            Ok(value) => {
                self.succeeded(step);
                Ok(value)
            }
            Err(e) => {
                let e = e.into();
                error!(step = step.name, error = %e, "Step failed");
                Err(e)
            }
        }
    }

    /// Run a step whose failure must not stop the unit of work.
    ///
    /// `context` prefixes the log line and, for alerted steps, the alert
    /// message. Returns `None` when the step failed and was recovered.
    pub async fn attempt<T, E, F>(&mut self, step: Step, context: &str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let e = match fut.await {
            Ok(value) => {
                self.succeeded(step);
                return Some(value);
            }
            Err(e) => e.to_string(),
        };

        match step.policy {
            FailurePolicy::AlertAndContinue => {
                error!(step = step.name, error = %e, "{context}");
                self.notifier
                    .notify(Alert::new(step.alert_subject, format!("{context}: {e}")))
                    .await;
            }
            // An abort-class step passed here is still recovered; only
            // `require` ends the unit of work.
            FailurePolicy::LogAndContinue | FailurePolicy::Abort => {
                warn!(step = step.name, error = %e, "{context}");
            }
        }

        self.records.push(StepRecord {
            step: step.name,
            outcome: StepOutcome::Recovered { error: e },
        });
        None
    }

    pub fn into_records(self) -> Vec<StepRecord> {
        self.records
    }

    fn succeeded(&mut self, step: Step) {
        self.records.push(StepRecord {
            step: step.name,
            outcome: StepOutcome::Succeeded,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::testing::RecordingNotifier;

    const ALERTED: Step = Step::alerted("ack_enqueue", "Inbound Handler: Ack Enqueue Failed");
    const LOGGED: Step = Step::best_effort("attachment_save");
    const REQUIRED: Step = Step::abort("archive");

    #[tokio::test]
    async fn alerted_failure_notifies_once_and_continues() {
        let notifier = RecordingNotifier::new();
        let mut runner = StepRunner::new(&notifier);

        let out: Option<()> = runner
            .attempt(ALERTED, "Failed to enqueue acknowledgement for a@b.c", async {
                Err("queue down")
            })
            .await;
        assert!(out.is_none());

        let alerts = notifier.alerts().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].subject, "Inbound Handler: Ack Enqueue Failed");
        assert_eq!(
            alerts[0].message,
            "Failed to enqueue acknowledgement for a@b.c: queue down"
        );
        assert_eq!(
            runner.into_records(),
            vec![StepRecord {
                step: "ack_enqueue",
                outcome: StepOutcome::Recovered {
                    error: "queue down".into()
                }
            }]
        );
    }

    #[tokio::test]
    async fn logged_failure_does_not_alert() {
        let notifier = RecordingNotifier::new();
        let mut runner = StepRunner::new(&notifier);
        let out: Option<()> = runner
            .attempt(LOGGED, "Failed to save attachment", async { Err("disk full") })
            .await;
        assert!(out.is_none());
        assert!(notifier.alerts().await.is_empty());
    }

    #[tokio::test]
    async fn required_failure_propagates() {
        let notifier = RecordingNotifier::new();
        let mut runner = StepRunner::new(&notifier);

        let value = runner
            .require(REQUIRED, async { Ok::<_, StorageError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        let err = runner
            .require(REQUIRED, async {
                Err::<(), _>(StorageError::NotFound {
                    key: "staging/m1".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
        assert!(notifier.alerts().await.is_empty());
        assert_eq!(runner.into_records().len(), 1);
    }
}
