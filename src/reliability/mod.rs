pub mod health;
pub mod metrics;
pub mod retry;

pub use health::{
    ComponentHealth, HealthConfig, HealthHandle, HealthMonitor, HealthReport, HealthStatus,
};
pub use metrics::{MetricKind, MetricsError, MetricsSnapshot, PipelineMetrics, serve_metrics};
pub use retry::{RetryPolicy, RetryStrategy};
