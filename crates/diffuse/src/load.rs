//! Local load estimation.
//!
//! The dispatcher compares an estimate against its threshold to decide whether
//! a call runs here or gets diffused.

/// Something that can tell how busy this node is.
pub trait LoadEstimator: Send + Sync + 'static {
    fn load(&self) -> f64;
}

/// A constant load, for tests and for nodes that should always (or never) diffuse.
#[derive(Debug, Clone, Copy)]
pub struct FixedLoad(pub f64);

impl LoadEstimator for FixedLoad {
    fn load(&self) -> f64 {
        self.0
    }
}

/// The one-minute load average divided by the number of cores.
///
/// Reads `/proc/loadavg`; where that is unavailable the load is reported as 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadAverage;

impl LoadAverage {
    fn sample() -> Option<f64> {
        let text = std::fs::read_to_string("/proc/loadavg").ok()?;
        let one_minute: f64 = text.split_whitespace().next()?.parse().ok()?;
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        Some(one_minute / cores as f64)
    }
}

impl LoadEstimator for LoadAverage {
    fn load(&self) -> f64 {
        Self::sample().unwrap_or_else(|| {
            tracing::debug!("load average unavailable, reporting idle");
            0.0
        })
    }
}
