use serde::Serialize;
use std::time::Duration;

/// 壓測產生器本身的資源使用量，用來確認瓶頸不是出在本機
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceStats {
    pub cpu_usage: f32,
    pub peak_cpu_usage: f32,
    pub memory_usage_mb: u64,
    pub peak_memory_mb: u64,
    pub samples: u64,
}

#[cfg(feature = "cli")]
mod imp {
    use super::ResourceStats;
    use std::sync::Mutex;
    use sysinfo::{Pid, RefreshKind, System};

    pub struct ResourceMonitor {
        system: Mutex<System>,
        pid: Option<Pid>,
        stats: Mutex<ResourceStats>,
        enabled: bool,
    }

    impl ResourceMonitor {
        pub fn new(enabled: bool) -> Self {
            let mut system = System::new_with_specifics(RefreshKind::everything());
            system.refresh_all();

            let pid = match sysinfo::get_current_pid() {
                Ok(pid) => Some(pid),
                Err(e) => {
                    tracing::warn!("Resource monitoring unavailable: {}", e);
                    None
                }
            };

            Self {
                system: Mutex::new(system),
                pid,
                stats: Mutex::new(ResourceStats::default()),
                enabled: enabled && pid.is_some(),
            }
        }

        pub fn sample(&self) {
            if !self.enabled {
                return;
            }
            let Some(pid) = self.pid else { return };
            let Ok(mut system) = self.system.lock() else {
                return;
            };
            system.refresh_all();

            let Some(process) = system.process(pid) else {
                return;
            };
            let memory_mb = process.memory() / 1024 / 1024;
            let cpu = process.cpu_usage();

            if let Ok(mut stats) = self.stats.lock() {
                stats.cpu_usage = cpu;
                stats.memory_usage_mb = memory_mb;
                stats.peak_cpu_usage = stats.peak_cpu_usage.max(cpu);
                stats.peak_memory_mb = stats.peak_memory_mb.max(memory_mb);
                stats.samples += 1;
            }
        }

        pub fn snapshot(&self) -> Option<ResourceStats> {
            if !self.enabled {
                return None;
            }
            self.stats.lock().ok().map(|s| s.clone())
        }

        pub fn is_enabled(&self) -> bool {
            self.enabled
        }
    }
}

// 非 CLI 建置時不帶 sysinfo
#[cfg(not(feature = "cli"))]
mod imp {
    use super::ResourceStats;

    pub struct ResourceMonitor;

    impl ResourceMonitor {
        pub fn new(_enabled: bool) -> Self {
            Self
        }

        pub fn sample(&self) {}

        pub fn snapshot(&self) -> Option<ResourceStats> {
            None
        }

        pub fn is_enabled(&self) -> bool {
            false
        }
    }
}

pub use imp::ResourceMonitor;

impl ResourceMonitor {
    pub fn log_stats(&self, phase: &str) {
        self.sample();
        if let Some(stats) = self.snapshot() {
            tracing::info!(
                "📊 {} - CPU: {:.1}% (peak {:.1}%), Memory: {}MB (peak {}MB)",
                phase,
                stats.cpu_usage,
                stats.peak_cpu_usage,
                stats.memory_usage_mb,
                stats.peak_memory_mb
            );
        }
    }

    /// 背景定期取樣，直到 `stop` 變成 true
    pub fn spawn_sampler(
        self: std::sync::Arc<Self>,
        every: Duration,
        mut stop: tokio::sync::watch::Receiver<bool>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if !self.is_enabled() {
            return None;
        }

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let monitor = self.clone();
                        // sysinfo refresh 是同步呼叫
                        let _ = tokio::task::spawn_blocking(move || monitor.sample()).await;
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
        }))
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}
