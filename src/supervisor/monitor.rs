// Watches transport state, feeds the health monitor, raises degraded alerts.
use super::alert::{AlertReason, AlertSink, DegradedAlert};
use crate::reliability::{ComponentHealth, HealthMonitor, MetricKind, PipelineMetrics};
use crate::transport::TransportState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub(crate) const TRANSPORT_COMPONENT: &str = "transport";

pub(crate) struct StateMonitor {
    pub target: String,
    pub states: watch::Receiver<TransportState>,
    pub health: Arc<HealthMonitor>,
    pub alerts: Arc<dyn AlertSink>,
    pub metrics: Arc<PipelineMetrics>,
    pub alert_after: Duration,
    pub alert_threshold: u32,
    /// `DegradedTransitions` before this transport was opened.
    pub degraded_baseline: u64,
    pub cancel: CancellationToken,
}

impl StateMonitor {
    pub(crate) async fn run(mut self) {
        let mut seen = 0u32;

        loop {
            let state = *self.states.borrow_and_update();
            let periods = self.degraded_periods();

            if state != TransportState::Degraded && periods > seen {
                // Degraded and recovered again between two wakeups.
                self.missed_periods(periods).await;
                seen = periods;
            }

            match state {
                TransportState::Degraded => {
                    seen = periods.max(seen + 1);
                    if !self.watch_degraded_period(seen).await {
                        return;
                    }
                    continue;
                }
                TransportState::Ready => {
                    self.health
                        .record_health_check(TRANSPORT_COMPONENT, true)
                        .await;
                }
                TransportState::Draining => {
                    self.health
                        .update_component_health(
                            TRANSPORT_COMPONENT,
                            ComponentHealth::Degraded("draining".to_string()),
                        )
                        .await;
                }
                TransportState::Closed => {
                    self.health
                        .update_component_health(
                            TRANSPORT_COMPONENT,
                            ComponentHealth::Unhealthy("closed".to_string()),
                        )
                        .await;
                    debug!("Transport closed, state monitor exiting");
                    return;
                }
                TransportState::Uninitialized | TransportState::Connecting => {}
            }

            tokio::select! {
                () = self.cancel.cancelled() => return,
                changed = self.states.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Follows one degraded period to its end. Returns false when the monitor
    /// should stop.
    async fn watch_degraded_period(&mut self, period: u32) -> bool {
        let began = Instant::now();
        self.health
            .record_health_check(TRANSPORT_COMPONENT, false)
            .await;
        info!("Transport degraded (period {})", period);

        let mut alerted = false;
        if period >= self.alert_threshold {
            self.raise(AlertReason::RepeatedDegradation, period, began);
            alerted = true;
        }

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                () = sleep_until(began + self.alert_after), if !alerted => {
                    self.raise(AlertReason::ProlongedDegradation, period, began);
                    alerted = true;
                }
                changed = self.states.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                    if *self.states.borrow() != TransportState::Degraded
                        || self.degraded_periods() > period
                    {
                        info!("Transport left degraded state after {:?}", began.elapsed());
                        return true;
                    }
                }
            }
        }
    }

    /// Degraded periods since this transport was opened, as counted by the
    /// transport itself on every entry into `Degraded`.
    fn degraded_periods(&self) -> u32 {
        let total = self
            .metrics
            .get(MetricKind::DegradedTransitions)
            .saturating_sub(self.degraded_baseline);
        u32::try_from(total).unwrap_or(u32::MAX)
    }

    async fn missed_periods(&self, periods: u32) {
        self.health
            .record_health_check(TRANSPORT_COMPONENT, false)
            .await;
        info!("Transport flapped through degraded (period {})", periods);
        if periods >= self.alert_threshold {
            self.raise(AlertReason::RepeatedDegradation, periods, Instant::now());
        }
    }

    fn raise(&self, reason: AlertReason, period: u32, began: Instant) {
        self.metrics.increment(MetricKind::Alerts);
        self.alerts.alert(&DegradedAlert {
            target: self.target.clone(),
            reason,
            period,
            degraded_for: began.elapsed(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::HealthConfig;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorded {
        alerts: Mutex<Vec<DegradedAlert>>,
    }

    impl AlertSink for Recorded {
        fn alert(&self, alert: &DegradedAlert) {
            self.alerts.lock().push(alert.clone());
        }
    }

    fn spawn_monitor(
        initial: TransportState,
        metrics: &Arc<PipelineMetrics>,
        alerts: &Arc<Recorded>,
        threshold: u32,
    ) -> (watch::Sender<TransportState>, CancellationToken, tokio::task::JoinHandle<()>) {
        let (tx, rx) = watch::channel(initial);
        let cancel = CancellationToken::new();
        let monitor = StateMonitor {
            target: "udp://sink:12201".to_string(),
            states: rx,
            health: Arc::new(HealthMonitor::new(HealthConfig::default())),
            alerts: Arc::clone(alerts) as Arc<dyn AlertSink>,
            metrics: Arc::clone(metrics),
            alert_after: Duration::from_secs(30),
            alert_threshold: threshold,
            degraded_baseline: 0,
            cancel: cancel.clone(),
        };
        (tx, cancel, tokio::spawn(monitor.run()))
    }

    async fn first_alert(alerts: &Recorded) -> DegradedAlert {
        for _ in 0..100 {
            if let Some(alert) = alerts.alerts.lock().first() {
                return alert.clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no alert raised");
    }

    #[tokio::test]
    async fn test_flaps_between_wakeups_still_count() {
        let metrics = Arc::new(PipelineMetrics::new());
        let alerts = Arc::new(Recorded::default());
        let (tx, cancel, handle) = spawn_monitor(TransportState::Ready, &metrics, &alerts, 2);

        // Two degraded periods that began and ended before the monitor woke.
        metrics.add(MetricKind::DegradedTransitions, 2);
        tx.send(TransportState::Ready).unwrap();

        let alert = first_alert(&alerts).await;
        assert_eq!(alert.reason, AlertReason::RepeatedDegradation);
        assert_eq!(alert.period, 2);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(alerts.alerts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_reflap_inside_degraded_period_starts_new_period() {
        let metrics = Arc::new(PipelineMetrics::new());
        metrics.increment(MetricKind::DegradedTransitions);
        let alerts = Arc::new(Recorded::default());
        let (tx, cancel, handle) = spawn_monitor(TransportState::Degraded, &metrics, &alerts, 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(alerts.alerts.lock().is_empty());

        // Degraded -> Ready -> Degraded, observed only as the final value.
        metrics.increment(MetricKind::DegradedTransitions);
        tx.send(TransportState::Degraded).unwrap();

        let alert = first_alert(&alerts).await;
        assert_eq!(alert.reason, AlertReason::RepeatedDegradation);
        assert_eq!(alert.period, 2);

        cancel.cancel();
        handle.await.unwrap();
    }
}
