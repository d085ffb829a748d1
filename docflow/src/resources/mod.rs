//! Resource-aware admission control.
//!
//! The monitor samples system utilization at a configurable interval and
//! gates new work admission. Admission is non-blocking; under pressure the
//! caller defers and re-polls (backpressure, never rejection or data loss).
//! Hysteresis keeps the effective concurrency ceiling from oscillating:
//! pressure steps the ceiling down immediately, and it is only restored
//! after a sustained calm period below a lower threshold.

mod sampler;

pub use sampler::{ProcSampler, Utilization, UtilizationSampler};

use crate::errors::ResourceError;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Hard limits for admission control. The effective concurrency ceiling is
/// mutated at runtime by the monitor's throttling, never by stages.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Maximum CPU utilization percent before admission stops.
    pub max_cpu_percent: f64,
    /// Maximum memory utilization percent before admission stops.
    pub max_memory_percent: f64,
    /// Maximum concurrently admitted work items.
    pub max_concurrent: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_cpu_percent: 85.0,
            max_memory_percent: 85.0,
            max_concurrent: 8,
        }
    }
}

/// Tuning for the monitor's sampling and hysteresis behavior.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// The admission limits.
    pub limits: ResourceLimits,
    /// How often the background task samples utilization.
    pub sample_interval: Duration,
    /// Projected utilization cost (percent) of one unit of resource weight.
    pub weight_cost_percent: f64,
    /// How many ceiling slots one throttle step removes or restores.
    pub throttle_step: usize,
    /// Utilization percent below which the system counts as calm.
    pub restore_below_percent: f64,
    /// How long the system must stay calm before a ceiling step is restored.
    pub restore_after: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            sample_interval: Duration::from_millis(500),
            weight_cost_percent: 5.0,
            throttle_step: 2,
            restore_below_percent: 60.0,
            restore_after: Duration::from_secs(5),
        }
    }
}

/// Admission counters for observability and tests.
#[derive(Debug, Default)]
pub struct AdmissionMetrics {
    admitted: AtomicU64,
    deferred: AtomicU64,
    throttle_events: AtomicU64,
}

impl AdmissionMetrics {
    /// Total granted admissions.
    #[must_use]
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Total refused (deferred) admissions.
    #[must_use]
    pub fn deferred(&self) -> u64 {
        self.deferred.load(Ordering::Relaxed)
    }

    /// Number of ceiling step-downs.
    #[must_use]
    pub fn throttle_events(&self) -> u64 {
        self.throttle_events.load(Ordering::Relaxed)
    }
}

/// RAII admission permit; dropping it releases the admitted weight.
pub struct AdmissionPermit {
    monitor: Arc<ResourceMonitor>,
    weight: f64,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.monitor.release(self.weight);
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("weight", &self.weight)
            .finish()
    }
}

/// Process-wide utilization monitor and admission gate.
///
/// Explicitly constructed and injected (no ambient global); one instance is
/// shared by every concurrently running pipeline so admission control is
/// global across runs.
pub struct ResourceMonitor {
    config: MonitorConfig,
    sampler: Arc<dyn UtilizationSampler>,
    utilization: RwLock<Utilization>,
    /// Effective concurrency ceiling; hysteresis moves it between 1 and
    /// `limits.max_concurrent`.
    ceiling: AtomicUsize,
    active: AtomicUsize,
    active_weight: Mutex<f64>,
    calm_since: Mutex<Option<Instant>>,
    metrics: AdmissionMetrics,
    sampler_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ResourceMonitor {
    /// Creates a monitor with the default `/proc` sampler.
    #[must_use]
    pub fn new(config: MonitorConfig) -> Arc<Self> {
        Self::with_sampler(config, Arc::new(ProcSampler::new()))
    }

    /// Creates a monitor with an injected sampler (tests use scripted ones).
    #[must_use]
    pub fn with_sampler(config: MonitorConfig, sampler: Arc<dyn UtilizationSampler>) -> Arc<Self> {
        let ceiling = config.limits.max_concurrent.max(1);
        Arc::new(Self {
            config,
            sampler,
            utilization: RwLock::new(Utilization::default()),
            ceiling: AtomicUsize::new(ceiling),
            active: AtomicUsize::new(0),
            active_weight: Mutex::new(0.0),
            calm_since: Mutex::new(None),
            metrics: AdmissionMetrics::default(),
            sampler_task: Mutex::new(None),
        })
    }

    /// Starts the background sampling task. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.sampler_task.lock();
        if guard.is_some() {
            return;
        }
        let monitor = Arc::clone(self);
        let interval = self.config.sample_interval;
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let sample = monitor.sampler.sample();
                monitor.apply_sample(sample);
            }
        }));
        info!(interval_ms = interval.as_millis() as u64, "Resource monitor started");
    }

    /// Stops the background sampling task.
    pub fn shutdown(&self) {
        if let Some(task) = self.sampler_task.lock().take() {
            task.abort();
        }
    }

    /// Folds a utilization sample into the throttling state.
    ///
    /// Exposed so tests can drive hysteresis without the sampling task.
    pub fn apply_sample(&self, sample: Utilization) {
        let limits = &self.config.limits;
        let pressured = sample.cpu_percent > limits.max_cpu_percent
            || sample.memory_percent > limits.max_memory_percent;
        let calm = sample.cpu_percent < self.config.restore_below_percent
            && sample.memory_percent < self.config.restore_below_percent;

        *self.utilization.write() = sample;

        if pressured {
            *self.calm_since.lock() = None;
            let previous = self.ceiling.load(Ordering::SeqCst);
            let reduced = previous.saturating_sub(self.config.throttle_step).max(1);
            if reduced < previous {
                self.ceiling.store(reduced, Ordering::SeqCst);
                self.metrics.throttle_events.fetch_add(1, Ordering::Relaxed);
                debug!(ceiling = reduced, "Resource pressure; concurrency ceiling reduced");
            }
        } else if calm {
            let mut calm_since = self.calm_since.lock();
            match *calm_since {
                None => *calm_since = Some(Instant::now()),
                Some(since) if since.elapsed() >= self.config.restore_after => {
                    let previous = self.ceiling.load(Ordering::SeqCst);
                    let restored =
                        (previous + self.config.throttle_step).min(limits.max_concurrent);
                    if restored > previous {
                        self.ceiling.store(restored, Ordering::SeqCst);
                        debug!(ceiling = restored, "Sustained calm; concurrency ceiling restored");
                    }
                    *calm_since = Some(Instant::now());
                }
                Some(_) => {}
            }
        } else {
            // Inside the hysteresis band: hold the ceiling, restart the clock.
            *self.calm_since.lock() = None;
        }
    }

    /// Attempts to admit work of the given weight. Non-blocking.
    ///
    /// Returns a permit on success; `None` means the caller should defer
    /// and re-poll with backoff.
    #[must_use]
    pub fn admit(self: &Arc<Self>, weight: f64) -> Option<AdmissionPermit> {
        match self.try_admit(weight) {
            Ok(permit) => Some(permit),
            Err(_) => None,
        }
    }

    /// Like [`admit`](Self::admit) but reports why admission was refused.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Exhausted`] when the projected utilization
    /// or the concurrency ceiling would be exceeded.
    pub fn try_admit(self: &Arc<Self>, weight: f64) -> Result<AdmissionPermit, ResourceError> {
        let active = self.active.load(Ordering::SeqCst);
        let refused = || ResourceError::Exhausted {
            requested: weight,
            active,
        };

        if active >= self.ceiling.load(Ordering::SeqCst) {
            self.metrics.deferred.fetch_add(1, Ordering::Relaxed);
            return Err(refused());
        }

        let projected_cost = weight * self.config.weight_cost_percent;
        let util = self.utilization.read().clone();
        if util.cpu_percent + projected_cost > self.config.limits.max_cpu_percent
            || util.memory_percent + projected_cost > self.config.limits.max_memory_percent
        {
            self.metrics.deferred.fetch_add(1, Ordering::Relaxed);
            return Err(refused());
        }

        self.active.fetch_add(1, Ordering::SeqCst);
        *self.active_weight.lock() += weight;
        self.metrics.admitted.fetch_add(1, Ordering::Relaxed);

        Ok(AdmissionPermit {
            monitor: Arc::clone(self),
            weight,
        })
    }

    fn release(&self, weight: f64) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        let mut active_weight = self.active_weight.lock();
        *active_weight = (*active_weight - weight).max(0.0);
    }

    /// Returns the last observed utilization.
    #[must_use]
    pub fn utilization(&self) -> Utilization {
        self.utilization.read().clone()
    }

    /// Returns the current effective concurrency ceiling.
    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.ceiling.load(Ordering::SeqCst)
    }

    /// Returns the number of currently admitted work items.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns the admission counters.
    #[must_use]
    pub fn metrics(&self) -> &AdmissionMetrics {
        &self.metrics
    }
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("ceiling", &self.ceiling())
            .field("active", &self.active())
            .field("utilization", &self.utilization())
            .finish()
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.sampler_task.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> MonitorConfig {
        MonitorConfig {
            limits: ResourceLimits {
                max_cpu_percent: 80.0,
                max_memory_percent: 80.0,
                max_concurrent: 4,
            },
            restore_below_percent: 50.0,
            restore_after: Duration::from_millis(0),
            ..MonitorConfig::default()
        }
    }

    fn idle_sampler() -> Arc<dyn UtilizationSampler> {
        Arc::new(crate::testing::ScriptedSampler::constant(10.0, 10.0))
    }

    #[test]
    fn test_admit_up_to_ceiling() {
        let monitor = ResourceMonitor::with_sampler(quiet_config(), idle_sampler());

        let permits: Vec<_> = (0..4).map(|_| monitor.admit(1.0)).collect();
        assert!(permits.iter().all(Option::is_some));
        assert!(monitor.admit(1.0).is_none());
        assert_eq!(monitor.metrics().deferred(), 1);
    }

    #[test]
    fn test_permit_drop_releases() {
        let monitor = ResourceMonitor::with_sampler(quiet_config(), idle_sampler());

        let permit = monitor.admit(2.0).unwrap();
        assert_eq!(monitor.active(), 1);
        drop(permit);
        assert_eq!(monitor.active(), 0);
        assert!(monitor.admit(1.0).is_some());
    }

    #[test]
    fn test_projected_utilization_refuses() {
        let monitor = ResourceMonitor::with_sampler(quiet_config(), idle_sampler());
        monitor.apply_sample(Utilization::new(78.0, 20.0));

        // 78 + 1.0 * 5.0 > 80 -> refused; low weight still fits.
        assert!(monitor.admit(1.0).is_none());
        assert!(monitor.admit(0.1).is_some());
    }

    #[test]
    fn test_hysteresis_steps_down_and_restores() {
        let monitor = ResourceMonitor::with_sampler(quiet_config(), idle_sampler());
        assert_eq!(monitor.ceiling(), 4);

        monitor.apply_sample(Utilization::new(95.0, 30.0));
        assert_eq!(monitor.ceiling(), 2);
        assert_eq!(monitor.metrics().throttle_events(), 1);

        // Between thresholds: ceiling holds, no restore.
        monitor.apply_sample(Utilization::new(70.0, 30.0));
        assert_eq!(monitor.ceiling(), 2);

        // Calm twice: first sample arms the timer, second restores
        // (restore_after is zero in this config).
        monitor.apply_sample(Utilization::new(20.0, 20.0));
        monitor.apply_sample(Utilization::new(20.0, 20.0));
        assert_eq!(monitor.ceiling(), 4);
    }

    #[test]
    fn test_ceiling_never_below_one() {
        let monitor = ResourceMonitor::with_sampler(quiet_config(), idle_sampler());
        for _ in 0..10 {
            monitor.apply_sample(Utilization::new(99.0, 99.0));
        }
        assert_eq!(monitor.ceiling(), 1);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let monitor = ResourceMonitor::with_sampler(
            MonitorConfig {
                sample_interval: Duration::from_millis(5),
                ..quiet_config()
            },
            Arc::new(crate::testing::ScriptedSampler::constant(42.0, 10.0)),
        );

        monitor.start();
        monitor.start(); // idempotent
        tokio::time::sleep(Duration::from_millis(40)).await;
        monitor.shutdown();

        assert!((monitor.utilization().cpu_percent - 42.0).abs() < f64::EPSILON);
    }
}
