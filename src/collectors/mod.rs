pub mod glances;

use async_trait::async_trait;

use crate::error::Result;

/// One point-in-time set of health values, as persisted by a store.
///
/// Every field is concrete: sources substitute defaults for optional
/// readings instead of leaving them unset.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub cpu_total: f64,
    pub memory_percent: f64,
    pub swap_percent: f64,
    pub disk_usage: f64,
    pub disk_io_read: i64,
    pub disk_io_write: i64,
    pub network_tx: i64,
    pub network_rx: i64,
    pub cpu_temp: f64,
    pub gpu_usage: f64,
    pub cpu_freq: i64,
}

#[async_trait]
pub trait MetricsSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self) -> Result<MetricSnapshot>;
}
