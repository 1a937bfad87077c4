//! Cron job registry implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use cronpatch_core::{Clock, CronSchedule, ResourceKey, SystemClock};

use crate::{JobCallback, JobHandle, RegistryConfig, ResourceJobSet, SchedulerError};

/// A registered job.
struct ScheduledJob {
    key: ResourceKey,
    patch_name: String,
    schedule: CronSchedule,
    next_fire: Option<DateTime<Utc>>,
    callback: JobCallback,
}

#[derive(Default)]
struct RegistryState {
    resources: HashMap<ResourceKey, ResourceJobSet>,
    jobs: HashMap<JobHandle, ScheduledJob>,
    next_handle: u64,
    running: bool,
}

impl RegistryState {
    /// Unregister one job, returning whether it existed.
    fn unregister(&mut self, handle: JobHandle) -> bool {
        self.jobs.remove(&handle).is_some()
    }
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    clock: Arc<dyn Clock>,
    config: RegistryConfig,
    /// Wakes the timer when the job set changes.
    wake: Notify,
}

struct TimerTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Registry of cron jobs keyed by resource and patch name.
///
/// Every operation takes one lock over the whole registry. Callbacks run on
/// their own tasks outside that lock, so by the time one runs the registry
/// may already have changed.
pub struct CronRegistry {
    inner: Arc<RegistryInner>,
    timer: Mutex<Option<TimerTask>>,
}

impl Default for CronRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CronRegistry {
    /// Create a registry driven by the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), RegistryConfig::default())
    }

    /// Create a registry driven by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>, config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState::default()),
                clock,
                config,
                wake: Notify::new(),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Start firing jobs. Does nothing if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(&self) {
        let mut timer = self.timer.lock().await;
        {
            let mut state = self.inner.state.lock().await;
            if state.running {
                return;
            }
            state.running = true;

            // Fire times missed while stopped are skipped, not replayed.
            let now = self.inner.clock.now();
            for job in state.jobs.values_mut() {
                job.next_fire = job.schedule.next_after(now);
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run_timer(shutdown_rx).await });
        *timer = Some(TimerTask {
            shutdown_tx,
            handle,
        });
        info!("cron registry started");
    }

    /// Stop firing jobs.
    ///
    /// Callbacks already running are left to finish; none start after this
    /// returns. Safe to call when not started.
    pub async fn stop(&self) {
        let mut timer = self.timer.lock().await;
        self.inner.state.lock().await.running = false;

        if let Some(task) = timer.take() {
            let _ = task.shutdown_tx.send(true);
            if let Err(e) = task.handle.await {
                warn!(error = %e, "cron timer task ended abnormally");
            }
            info!("cron registry stopped");
        }
    }

    /// Whether the timer is running.
    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.running
    }

    /// Register a job for `patch_name` on `key`.
    ///
    /// An existing job for the same slot is unregistered first. On a parse
    /// failure the registry is left unchanged.
    #[tracing::instrument(skip(self, key, callback), fields(resource = %key))]
    pub async fn add(
        &self,
        key: &ResourceKey,
        patch_name: &str,
        spec: &str,
        timezone: Option<&str>,
        callback: JobCallback,
    ) -> Result<JobHandle, SchedulerError> {
        let schedule = CronSchedule::parse(spec, timezone)?;
        let next_fire = schedule.next_after(self.inner.clock.now());

        let mut state = self.inner.state.lock().await;
        let replaced = state
            .resources
            .get_mut(key)
            .and_then(|set| set.remove(patch_name));
        if let Some(old) = replaced {
            state.unregister(old);
            debug!(%old, "replaced existing job");
        }

        state.next_handle += 1;
        let handle = JobHandle(state.next_handle);
        state.jobs.insert(
            handle,
            ScheduledJob {
                key: key.clone(),
                patch_name: patch_name.to_string(),
                schedule,
                next_fire,
                callback,
            },
        );
        state
            .resources
            .entry(key.clone())
            .or_default()
            .insert(patch_name.to_string(), handle);
        drop(state);

        self.inner.wake.notify_one();
        debug!(%handle, next_fire = ?next_fire, "registered job");
        Ok(handle)
    }

    /// Unregister the job for `patch_name` on `key`, if any.
    pub async fn remove(&self, key: &ResourceKey, patch_name: &str) {
        let mut state = self.inner.state.lock().await;
        let Some(set) = state.resources.get_mut(key) else {
            return;
        };
        let removed = set.remove(patch_name);
        if set.is_empty() {
            state.resources.remove(key);
        }
        if let Some(handle) = removed {
            state.unregister(handle);
            debug!(resource = %key, patch = patch_name, %handle, "removed job");
        }
    }

    /// Unregister every job for `key` and forget the resource.
    ///
    /// Returns how many jobs were removed.
    pub async fn clear(&self, key: &ResourceKey) -> usize {
        let mut state = self.inner.state.lock().await;
        let Some(set) = state.resources.remove(key) else {
            return 0;
        };
        let removed = set
            .into_values()
            .filter(|handle| state.unregister(*handle))
            .count();
        debug!(resource = %key, removed, "cleared jobs");
        removed
    }

    /// Snapshot of the jobs registered for `key`.
    pub async fn list(&self, key: &ResourceKey) -> ResourceJobSet {
        self.inner
            .state
            .lock()
            .await
            .resources
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Resources with at least one job.
    pub async fn resources(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<_> = self
            .inner
            .state
            .lock()
            .await
            .resources
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Total number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.inner.state.lock().await.jobs.len()
    }

    /// When the job for `patch_name` on `key` fires next.
    pub async fn next_fire(&self, key: &ResourceKey, patch_name: &str) -> Option<DateTime<Utc>> {
        let state = self.inner.state.lock().await;
        let handle = state.resources.get(key)?.get(patch_name)?;
        state.jobs.get(handle)?.next_fire
    }

    /// Dispatch every job whose fire time has passed.
    ///
    /// The timer calls this on each tick; returns how many callbacks were
    /// spawned. Does nothing while stopped.
    pub async fn fire_due(&self) -> usize {
        self.inner.fire_due().await
    }
}

impl RegistryInner {
    async fn run_timer(&self, mut shutdown_rx: watch::Receiver<bool>) {
        debug!("cron timer running");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            self.fire_due().await;
            let wait = self.next_wakeup().await;

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.wake.notified() => {}
                _ = sleep(wait) => {}
            }
        }

        debug!("cron timer exited");
    }

    async fn fire_due(&self) -> usize {
        let now = self.clock.now();
        let due: Vec<(ResourceKey, String, JobCallback)> = {
            let mut state = self.state.lock().await;
            if !state.running {
                return 0;
            }
            state
                .jobs
                .values_mut()
                .filter(|job| job.next_fire.is_some_and(|at| at <= now))
                .map(|job| {
                    job.next_fire = job.schedule.next_after(now);
                    (
                        job.key.clone(),
                        job.patch_name.clone(),
                        Arc::clone(&job.callback),
                    )
                })
                .collect()
        };

        let count = due.len();
        for (key, patch_name, callback) in due {
            debug!(resource = %key, patch = %patch_name, "firing job");
            tokio::spawn(async move {
                if let Err(error) = callback(key.clone(), patch_name.clone()).await {
                    warn!(resource = %key, patch = %patch_name, %error, "job callback failed");
                }
            });
        }
        count
    }

    /// How long to sleep before the next job is due.
    async fn next_wakeup(&self) -> Duration {
        let state = self.state.lock().await;
        let now = self.clock.now();
        let max = self.config.max_tick;

        match state.jobs.values().filter_map(|job| job.next_fire).min() {
            Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO).min(max),
            None => max,
        }
    }
}

impl Drop for CronRegistry {
    fn drop(&mut self) {
        if let Some(task) = self.timer.get_mut().take() {
            let _ = task.shutdown_tx.send(true);
            task.handle.abort();
        }
    }
}
