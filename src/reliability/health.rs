use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Number of check outcomes retained per component.
const CHECK_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ComponentHealth {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl ComponentHealth {
    fn status(&self) -> HealthStatus {
        match self {
            ComponentHealth::Healthy => HealthStatus::Healthy,
            ComponentHealth::Degraded(_) => HealthStatus::Degraded,
            ComponentHealth::Unhealthy(_) => HealthStatus::Unhealthy,
        }
    }
}

/// Streak lengths that move a component between health levels.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub unhealthy_threshold: u32,
    pub recovery_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            recovery_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct Tracked {
    health: ComponentHealth,
    window: VecDeque<bool>,
    failure_streak: u32,
    success_streak: u32,
}

impl Tracked {
    fn new() -> Self {
        Self {
            health: ComponentHealth::Healthy,
            window: VecDeque::with_capacity(CHECK_WINDOW),
            failure_streak: 0,
            success_streak: 0,
        }
    }

    /// Folds one check outcome into the streaks and returns the resulting health.
    fn observe(&mut self, ok: bool, config: &HealthConfig) -> ComponentHealth {
        if self.window.len() == CHECK_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(ok);

        if !ok {
            self.success_streak = 0;
            self.failure_streak += 1;
            let reason = format!("{} checks failed in a row", self.failure_streak);
            return if self.failure_streak >= config.unhealthy_threshold {
                ComponentHealth::Unhealthy(reason)
            } else {
                ComponentHealth::Degraded(reason)
            };
        }

        self.failure_streak = 0;
        self.success_streak += 1;
        match self.health {
            // A degraded component is one good check away from healthy;
            // an unhealthy one needs a full recovery streak.
            ComponentHealth::Degraded(_) => ComponentHealth::Healthy,
            ComponentHealth::Unhealthy(_) if self.success_streak < config.recovery_threshold => {
                self.health.clone()
            }
            _ => ComponentHealth::Healthy,
        }
    }
}

/// Per-component health behind the supervisor's readiness and reports.
///
/// Components are either set directly with [`update_component_health`] or
/// driven by check outcomes through [`record_health_check`].
///
/// [`update_component_health`]: HealthMonitor::update_component_health
/// [`record_health_check`]: HealthMonitor::record_health_check
pub struct HealthMonitor {
    config: HealthConfig,
    components: RwLock<HashMap<String, Tracked>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            components: RwLock::new(HashMap::new()),
        }
    }

    pub async fn update_component_health(&self, component: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        let tracked = components
            .entry(component.to_owned())
            .or_insert_with(Tracked::new);
        if tracked.health != health {
            tracing::debug!(component, ?health, "component health set");
            tracked.health = health;
        }
    }

    pub async fn record_health_check(&self, component: &str, success: bool) {
        let mut components = self.components.write().await;
        let tracked = components
            .entry(component.to_owned())
            .or_insert_with(Tracked::new);

        let next = tracked.observe(success, &self.config);
        if next != tracked.health {
            tracing::info!(
                component,
                from = ?tracked.health,
                to = ?next,
                "component health transition"
            );
            tracked.health = next;
        }
    }

    /// Worst status across components; no components at all counts as unhealthy.
    pub async fn get_overall_health(&self) -> HealthStatus {
        let components = self.components.read().await;
        components
            .values()
            .map(|tracked| tracked.health.status())
            .max()
            .unwrap_or(HealthStatus::Unhealthy)
    }

    pub async fn get_component_health(&self, component: &str) -> ComponentHealth {
        match self.components.read().await.get(component) {
            Some(tracked) => tracked.health.clone(),
            None => ComponentHealth::Unhealthy(format!("{component} has not reported")),
        }
    }

    /// Oldest-first outcomes of the recorded checks.
    pub async fn get_component_history(&self, component: &str) -> Vec<bool> {
        self.components
            .read()
            .await
            .get(component)
            .map(|tracked| tracked.window.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn get_all_component_status(&self) -> HashMap<String, ComponentHealth> {
        self.components
            .read()
            .await
            .iter()
            .map(|(name, tracked)| (name.clone(), tracked.health.clone()))
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub timestamp: String,
    pub uptime: Duration,
}

impl HealthReport {
    pub async fn generate(monitor: &HealthMonitor, started_at: Instant) -> Self {
        let components = monitor.get_all_component_status().await;
        let overall_status = components
            .values()
            .map(ComponentHealth::status)
            .max()
            .unwrap_or(HealthStatus::Unhealthy);
        Self {
            overall_status,
            components,
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime: started_at.elapsed(),
        }
    }
}

/// Cloneable view of a pipeline's readiness and component health, handed
/// to the `/health` endpoint.
#[derive(Clone)]
pub struct HealthHandle {
    monitor: Arc<HealthMonitor>,
    ready: Arc<AtomicBool>,
    started_at: Instant,
}

impl HealthHandle {
    pub fn new(monitor: Arc<HealthMonitor>, ready: Arc<AtomicBool>, started_at: Instant) -> Self {
        Self {
            monitor,
            ready,
            started_at,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub async fn report(&self) -> HealthReport {
        HealthReport::generate(&self.monitor, self.started_at).await
    }

    /// Ready and not unhealthy. A degraded pipeline still serves traffic.
    pub async fn is_serving(&self) -> (bool, HealthReport) {
        let report = self.report().await;
        let serving = self.is_ready() && report.overall_status != HealthStatus::Unhealthy;
        (serving, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_components_is_unhealthy() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        assert_eq!(monitor.get_overall_health().await, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_failures_degrade_then_fail_then_recover() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        monitor.record_health_check("transport", true).await;
        assert_eq!(monitor.get_overall_health().await, HealthStatus::Healthy);

        monitor.record_health_check("transport", false).await;
        assert_eq!(monitor.get_overall_health().await, HealthStatus::Degraded);

        monitor.record_health_check("transport", false).await;
        monitor.record_health_check("transport", false).await;
        assert_eq!(monitor.get_overall_health().await, HealthStatus::Unhealthy);

        monitor.record_health_check("transport", true).await;
        assert!(matches!(
            monitor.get_component_health("transport").await,
            ComponentHealth::Unhealthy(_)
        ));
        monitor.record_health_check("transport", true).await;
        assert_eq!(monitor.get_overall_health().await, HealthStatus::Healthy);

        assert_eq!(
            monitor.get_component_history("transport").await,
            vec![true, false, false, false, true, true]
        );
    }

    #[tokio::test]
    async fn test_degraded_recovers_on_first_success() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        monitor.record_health_check("transport", false).await;
        monitor.record_health_check("transport", true).await;
        assert_eq!(
            monitor.get_component_health("transport").await,
            ComponentHealth::Healthy
        );
    }

    #[tokio::test]
    async fn test_report_includes_components() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        monitor
            .update_component_health("consumer", ComponentHealth::Healthy)
            .await;
        monitor
            .update_component_health("transport", ComponentHealth::Degraded("reconnecting".into()))
            .await;

        let report = HealthReport::generate(&monitor, Instant::now()).await;
        assert_eq!(report.overall_status, HealthStatus::Degraded);
        assert_eq!(report.components.len(), 2);
    }

    #[tokio::test]
    async fn test_handle_serves_only_when_ready() {
        let monitor = Arc::new(HealthMonitor::new(HealthConfig::default()));
        let ready = Arc::new(AtomicBool::new(false));
        let handle = HealthHandle::new(Arc::clone(&monitor), Arc::clone(&ready), Instant::now());

        monitor
            .update_component_health("transport", ComponentHealth::Healthy)
            .await;
        assert!(!handle.is_serving().await.0);

        ready.store(true, Ordering::Release);
        assert!(handle.is_serving().await.0);

        monitor
            .update_component_health("transport", ComponentHealth::Degraded("flapping".into()))
            .await;
        let (serving, report) = handle.is_serving().await;
        assert!(serving);
        assert_eq!(report.overall_status, HealthStatus::Degraded);

        monitor
            .update_component_health("transport", ComponentHealth::Unhealthy("closed".into()))
            .await;
        assert!(!handle.is_serving().await.0);
    }
}
