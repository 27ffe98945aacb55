//! Per-module request counters and the metrics snapshot served at `{prefix}/metrics`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Serialize, Serializer};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

/// Lock-free request counters owned by one module.
///
/// Safe to bump from any request handler. Counters are reset when the module
/// is activated, so they cover a single activation.
#[derive(Debug, Default)]
pub struct RequestCounters {
    requests: AtomicU64,
    errors: AtomicU64,
    total_latency_us: AtomicU64,
}

impl RequestCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one handled request and its latency.
    pub fn record_request(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Mean request latency in milliseconds; `0.0` before the first request.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // sub-microsecond precision is irrelevant here
    pub fn mean_response_ms(&self) -> f64 {
        let requests = self.requests();
        if requests == 0 {
            return 0.0;
        }
        let total_ms = self.total_latency_us.load(Ordering::Relaxed) as f64 / 1000.0;
        total_ms / requests as f64
    }

    pub(crate) fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.total_latency_us.store(0, Ordering::Relaxed);
    }
}

fn serialize_secs<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(d.as_secs_f64())
}

/// Point-in-time metrics for one module.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMetrics {
    pub name: String,
    /// Time since the last successful activation, zero while inactive. Serialized in seconds.
    #[serde(serialize_with = "serialize_secs")]
    pub uptime: Duration,
    pub request_count: u64,
    pub error_count: u64,
    /// Mean request latency in milliseconds.
    pub response_time: f64,
    /// Resident memory of the hosting process, in bytes.
    pub memory_usage: u64,
    pub custom_metrics: BTreeMap<String, serde_json::Value>,
}

/// Resident set size of the current process, or 0 when the platform does not report it.
#[must_use]
pub fn process_memory_bytes() -> u64 {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0;
    };
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        false,
        ProcessRefreshKind::nothing().with_memory(),
    );
    sys.process(pid).map_or(0, sysinfo::Process::memory)
}
