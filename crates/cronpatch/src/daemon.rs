//! Periodic reconciliation loop.

use std::future::Future;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};
use tracing::{error, info, warn};

use cronpatch_core::ResourceKey;

use crate::{Controller, ControllerError, ReconcileOutcome};

/// Longest wait between two retries of the same operation.
const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Counts from one pass over every resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    pub reconciled: usize,
    pub failed: usize,
}

impl Controller {
    /// Run until `shutdown_rx` turns true.
    ///
    /// Starts the job registry, reconciles every resource once per resync
    /// interval, and stops the registry on the way out.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), ControllerError> {
        info!(
            resync_interval_secs = self.config.resync_interval_secs,
            "controller starting"
        );
        self.registry().start().await;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let summary = self.resync_all(&mut shutdown_rx).await;
            info!(
                reconciled = summary.reconciled,
                failed = summary.failed,
                "resync pass complete"
            );

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = sleep(self.config.resync_interval()) => {}
            }
        }

        self.registry().stop().await;
        info!("controller stopped");
        Ok(())
    }

    /// Reconcile every resource in the store once.
    pub async fn resync_all(&self, shutdown_rx: &mut watch::Receiver<bool>) -> ResyncSummary {
        let mut summary = ResyncSummary::default();

        let keys = match self
            .with_retry("list resources", shutdown_rx, move || async move {
                Ok(self.store.list_resources().await?)
            })
            .await
        {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "failed to list resources");
                return summary;
            }
        };

        for key in keys {
            if *shutdown_rx.borrow() {
                break;
            }
            match self.reconcile_with_retry(&key, shutdown_rx).await {
                Ok(_) => summary.reconciled += 1,
                Err(e) => {
                    error!(resource = %key, error = %e, "reconcile failed");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Reconcile one resource, retrying transient failures with backoff.
    pub async fn reconcile_with_retry(
        &self,
        key: &ResourceKey,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<ReconcileOutcome, ControllerError> {
        self.with_retry("reconcile", shutdown_rx, move || self.reconcile(key))
            .await
    }

    fn retry_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_retry_interval(),
            max_interval: MAX_RETRY_INTERVAL,
            max_elapsed_time: Some(self.config.max_retry_elapsed()),
            ..Default::default()
        }
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    async fn with_retry<T, F, Fut>(
        &self,
        what: &str,
        shutdown_rx: &mut watch::Receiver<bool>,
        mut op: F,
    ) -> Result<T, ControllerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ControllerError>>,
    {
        let mut backoff = self.retry_backoff();
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            let Some(wait) = backoff.next_backoff() else {
                return Err(err);
            };
            warn!(operation = what, error = %err, ?wait, "transient failure, retrying");

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return Err(err);
                    }
                }
                _ = sleep(wait) => {}
            }
        }
    }
}
