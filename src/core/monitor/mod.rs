// ─── Monitoring Aggregator ───

pub mod aggregator;
pub mod model;

pub use aggregator::{MonitoringAggregator, DEFAULT_LOG_TAIL};
pub use model::{HostMetrics, MonitoringSnapshot, RuntimeStatus, ServerStatusSnapshot};
