use std::future::Future;

use futures::future::BoxFuture;

use crate::provisioning::error::{ProvisionError, ProvisionResult};

/// Ordered executor for multi-system provisioning runs.
///
/// Each step runs to completion before the next one starts. Compensations
/// are registered after the step they undo succeeds; when a later step
/// fails they run newest-first and the step's own error is returned,
/// wrapped with the step name. Compensation failures are logged and never
/// replace the original error.
pub struct Saga<'a> {
    name: String,
    compensations: Vec<(String, BoxFuture<'a, ProvisionResult<()>>)>,
}

impl<'a> Saga<'a> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compensations: Vec::new(),
        }
    }

    /// Run one step. On failure every registered compensation runs before
    /// the wrapped error is returned.
    pub async fn step<T, E, F>(&mut self, step: &str, action: F) -> ProvisionResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<ProvisionError>,
    {
        tracing::info!("[{}] {}", self.name, step);

        match action.await {
            Ok(value) => Ok(value),
            Err(err) => {
                let err = err.into().in_step(step);
                tracing::warn!("[{}] {}; compensating", self.name, err);
                self.compensate().await;
                Err(err)
            }
        }
    }

    /// Register the undo action for the step that just succeeded.
    pub fn on_rollback<F>(&mut self, label: impl Into<String>, compensation: F)
    where
        F: Future<Output = ProvisionResult<()>> + Send + 'a,
    {
        self.compensations.push((label.into(), Box::pin(compensation)));
    }

    /// Number of compensations that would run if a step failed now.
    pub fn pending(&self) -> usize {
        self.compensations.len()
    }

    /// Mark the run successful; registered compensations are dropped unrun.
    pub fn complete(self) {
        tracing::info!("[{}] complete", self.name);
    }

    async fn compensate(&mut self) {
        while let Some((label, compensation)) = self.compensations.pop() {
            match compensation.await {
                Ok(()) => tracing::info!("[{}] compensated: {}", self.name, label),
                Err(err) => {
                    tracing::error!("[{}] compensation '{}' failed: {}", self.name, label, err)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iap::IapError;
    use std::sync::{Arc, Mutex};

    fn recorder(log: &Arc<Mutex<Vec<String>>>, entry: &str) -> impl Future<Output = ProvisionResult<()>> + Send + 'static {
        let log = log.clone();
        let entry = entry.to_string();
        async move {
            log.lock().unwrap().push(entry);
            Ok(())
        }
    }

    #[tokio::test]
    async fn compensations_run_newest_first_on_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut saga = Saga::new("test");

        let group = saga
            .step("create group", async { Ok::<_, ProvisionError>("g-1".to_string()) })
            .await
            .unwrap();
        saga.on_rollback("delete group", recorder(&log, &format!("delete {}", group)));

        saga.step("create client", async { Ok::<_, ProvisionError>(()) })
            .await
            .unwrap();
        saga.on_rollback("delete client", recorder(&log, "delete client"));

        let err = saga
            .step("provision schema", async {
                Err::<(), _>(IapError::Conflict("schema exists".to_string()))
            })
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some("provision schema"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["delete client".to_string(), "delete g-1".to_string()]
        );
        assert_eq!(saga.pending(), 0);
    }

    #[tokio::test]
    async fn failing_compensation_does_not_replace_original_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut saga = Saga::new("test");

        saga.on_rollback("delete realm", recorder(&log, "delete realm"));
        saga.on_rollback("drop schema", async {
            Err(ProvisionError::NotFound("schema".to_string()))
        });

        let err = saga
            .step("persist tenant", async {
                Err::<(), _>(ProvisionError::validation("domain", "bad"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some("persist tenant"));
        assert!(matches!(err.root_cause(), ProvisionError::Validation { .. }));
        assert_eq!(*log.lock().unwrap(), vec!["delete realm".to_string()]);
    }

    #[tokio::test]
    async fn completed_saga_never_compensates() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut saga = Saga::new("test");

        saga.step("create realm", async { Ok::<_, ProvisionError>(()) })
            .await
            .unwrap();
        saga.on_rollback("delete realm", recorder(&log, "delete realm"));
        assert_eq!(saga.pending(), 1);
        saga.complete();

        assert!(log.lock().unwrap().is_empty());
    }
}
