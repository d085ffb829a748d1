//! Utilization sampling.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A point-in-time utilization reading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Utilization {
    /// CPU utilization percent, 0–100.
    pub cpu_percent: f64,
    /// Memory utilization percent, 0–100.
    pub memory_percent: f64,
}

impl Utilization {
    /// Creates a reading.
    #[must_use]
    pub fn new(cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            cpu_percent,
            memory_percent,
        }
    }
}

/// A source of utilization readings.
///
/// Injectable so orchestration can be tested against scripted load curves.
pub trait UtilizationSampler: Send + Sync {
    /// Takes a reading.
    fn sample(&self) -> Utilization;
}

/// Aggregate CPU counters from `/proc/stat`.
#[derive(Debug, Clone, Copy)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

/// Samples `/proc/stat` and `/proc/meminfo` on Linux.
///
/// CPU utilization is computed from the delta between consecutive samples;
/// the first reading and any parse failure report zero, which never
/// throttles (the concurrency ceiling still gates admission).
#[derive(Debug, Default)]
pub struct ProcSampler {
    previous: Mutex<Option<CpuTimes>>,
}

impl ProcSampler {
    /// Creates a new sampler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn cpu_times() -> Option<CpuTimes> {
        let stat = std::fs::read_to_string("/proc/stat").ok()?;
        let line = stat.lines().next()?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|f| f.parse().ok())
            .collect();
        if fields.len() < 4 {
            return None;
        }
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        let total: u64 = fields.iter().sum();
        Some(CpuTimes {
            busy: total.saturating_sub(idle),
            total,
        })
    }

    fn memory_percent() -> Option<f64> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        let mut total = None;
        let mut available = None;
        for line in meminfo.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                total = rest.split_whitespace().next()?.parse::<f64>().ok();
            } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
                available = rest.split_whitespace().next()?.parse::<f64>().ok();
            }
        }
        match (total, available) {
            (Some(total), Some(available)) if total > 0.0 => {
                Some(((total - available) / total) * 100.0)
            }
            _ => None,
        }
    }
}

impl UtilizationSampler for ProcSampler {
    fn sample(&self) -> Utilization {
        let memory_percent = Self::memory_percent().unwrap_or(0.0);

        let cpu_percent = match Self::cpu_times() {
            Some(current) => {
                let mut previous = self.previous.lock();
                let percent = match *previous {
                    Some(prior) if current.total > prior.total => {
                        let busy = current.busy.saturating_sub(prior.busy) as f64;
                        let total = (current.total - prior.total) as f64;
                        (busy / total) * 100.0
                    }
                    _ => 0.0,
                };
                *previous = Some(current);
                percent
            }
            None => 0.0,
        };

        Utilization::new(cpu_percent.clamp(0.0, 100.0), memory_percent.clamp(0.0, 100.0))
    }
}
