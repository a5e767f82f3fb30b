#[cfg(feature = "cli")]
use std::sync::Mutex;
#[cfg(feature = "cli")]
use std::time::{Duration, Instant};
#[cfg(feature = "cli")]
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Resource usage of the load driver itself. A saturated driver skews latency numbers,
/// so load runs can log this next to each phase.
#[cfg(feature = "cli")]
#[derive(Debug, Clone)]
pub struct DriverSample {
    pub cpu_percent: f32,
    pub rss_mb: u64,
    pub peak_rss_mb: u64,
    pub elapsed: Duration,
}

#[cfg(feature = "cli")]
pub struct DriverMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
    started: Instant,
    peak_rss_mb: Mutex<u64>,
    enabled: bool,
}

#[cfg(feature = "cli")]
impl DriverMonitor {
    pub fn new(enabled: bool) -> Self {
        let pid = if enabled {
            match sysinfo::get_current_pid() {
                Ok(pid) => Some(pid),
                Err(e) => {
                    tracing::warn!("Driver monitoring disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            system: Mutex::new(System::new()),
            pid,
            started: Instant::now(),
            peak_rss_mb: Mutex::new(0),
            enabled: enabled && pid.is_some(),
        }
    }

    pub fn sample(&self) -> Option<DriverSample> {
        if !self.enabled {
            return None;
        }
        let pid = self.pid?;

        let mut system = self.system.lock().ok()?;
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        let process = system.process(pid)?;
        let rss_mb = process.memory() / 1024 / 1024;

        let mut peak = self.peak_rss_mb.lock().ok()?;
        *peak = (*peak).max(rss_mb);

        Some(DriverSample {
            cpu_percent: process.cpu_usage(),
            rss_mb,
            peak_rss_mb: *peak,
            elapsed: self.started.elapsed(),
        })
    }

    pub fn log_phase(&self, phase: &str) {
        if let Some(s) = self.sample() {
            tracing::info!(
                phase,
                cpu_percent = s.cpu_percent,
                rss_mb = s.rss_mb,
                peak_rss_mb = s.peak_rss_mb,
                "📊 driver {} - CPU {:.1}%, RSS {}MB (peak {}MB), {:?} elapsed",
                phase,
                s.cpu_percent,
                s.rss_mb,
                s.peak_rss_mb,
                s.elapsed
            );
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(feature = "cli")]
impl Default for DriverMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(not(feature = "cli"))]
#[derive(Default)]
pub struct DriverMonitor;

#[cfg(not(feature = "cli"))]
impl DriverMonitor {
    pub fn new(_enabled: bool) -> Self {
        Self
    }

    pub fn log_phase(&self, _phase: &str) {}

    pub fn is_enabled(&self) -> bool {
        false
    }
}
