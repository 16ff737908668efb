mod logs_service;
mod metrics_service;

pub use logs_service::{LogLine, LogsService};
pub use metrics_service::{LocalMetricsService, MetricsService};
