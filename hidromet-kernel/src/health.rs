use crate::flowmeter::CacheState;
use serde::Serialize;
use std::time::Instant;

/// Instantané servi par GET /api/system/health
#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub memory_usage_mb: f32,
    pub flowmeter_cache: CacheState,
    pub informes_stored: usize,
    pub num_visitas: Option<u64>,
    pub weathercloud_credentials: bool,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self { start_time: Instant::now() }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn snapshot(
        &self,
        flowmeter_cache: CacheState,
        informes_stored: usize,
        num_visitas: Option<u64>,
        weathercloud_credentials: bool,
    ) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.uptime_seconds(),
            memory_usage_mb: get_memory_usage_mb(),
            flowmeter_cache,
            informes_stored,
            num_visitas,
            weathercloud_credentials,
        }
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }

    // inconnu hors Linux
    0.0
}
