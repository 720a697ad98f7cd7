use std::fmt;
use std::time::Duration;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertReason {
    /// One degraded period outlasted the configured duration.
    ProlongedDegradation,
    /// Degraded periods keep recurring.
    RepeatedDegradation,
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertReason::ProlongedDegradation => f.write_str("prolonged degradation"),
            AlertReason::RepeatedDegradation => f.write_str("repeated degradation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradedAlert {
    pub target: String,
    pub reason: AlertReason,
    /// 1-based count of degraded periods since start.
    pub period: u32,
    pub degraded_for: Duration,
}

/// Receives at most one alert per degraded period.
pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: &DegradedAlert);
}

/// Default sink: an error-level log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, alert: &DegradedAlert) {
        error!(
            target_sink = %alert.target,
            period = alert.period,
            degraded_for_ms = alert.degraded_for.as_millis() as u64,
            "ALERT: log sink {} ({})",
            alert.reason,
            alert.target
        );
    }
}
