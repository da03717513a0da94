//! Service registry: the configured pools of upstream instances.
//!
//! The registry is built once from configuration and shared across workers.
//! Membership is static for the process lifetime (reconfiguration is a
//! restart-in-place); per-instance runtime state (health, in-flight counts,
//! breaker) lives in atomics and per-instance locks.

use crate::models::settings::{
    BreakerSettings, RetrySettings, ServiceSettings, Strategy,
};
use crate::services::circuit_breaker::{BreakerCheck, CircuitBreaker, CircuitState};
use crate::services::load_balancer;
use ahash::AHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One addressable upstream instance with its runtime state.
#[derive(Debug)]
pub struct ServiceInstance {
    pub id: String,
    pub url: String,
    pub weight: u32,
    healthy: AtomicBool,
    in_flight: AtomicU64,
    /// Unix seconds of the last recorded outcome; 0 = never.
    last_success_at: AtomicU64,
    last_failure_at: AtomicU64,
    pub breaker: CircuitBreaker,
}

impl ServiceInstance {
    pub fn new(
        settings: &crate::models::settings::InstanceSettings,
        breaker_settings: BreakerSettings,
    ) -> Self {
        Self {
            id: settings.id.clone(),
            url: settings.url.trim_end_matches('/').to_string(),
            weight: settings.weight.max(1),
            healthy: AtomicBool::new(true),
            in_flight: AtomicU64::new(0),
            last_success_at: AtomicU64::new(0),
            last_failure_at: AtomicU64::new(0),
            breaker: CircuitBreaker::new(settings.id.clone(), breaker_settings),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn last_success_at(&self) -> Option<u64> {
        match self.last_success_at.load(Ordering::Relaxed) {
            0 => None,
            t => Some(t),
        }
    }

    pub fn last_failure_at(&self) -> Option<u64> {
        match self.last_failure_at.load(Ordering::Relaxed) {
            0 => None,
            t => Some(t),
        }
    }

    /// Marks the start of one proxied attempt against this instance.
    pub fn begin_request(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks the end of one proxied attempt.
    pub fn end_request(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Records a successful attempt with the breaker and the health flag.
    pub fn record_success(&self) {
        self.last_success_at.store(epoch_secs(), Ordering::Relaxed);
        self.healthy.store(true, Ordering::Relaxed);
        self.breaker.record_success();
    }

    /// Records a failed attempt. The instance is flagged unhealthy once its
    /// breaker opens.
    pub fn record_failure(&self) {
        self.last_failure_at.store(epoch_secs(), Ordering::Relaxed);
        self.breaker.record_failure();
        if self.breaker.current_state() == CircuitState::Open {
            self.healthy.store(false, Ordering::Relaxed);
        }
    }

    fn eligible(&self) -> bool {
        self.is_healthy() && self.breaker.check() == BreakerCheck::Ready
    }
}

/// Why a pool could not produce an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    /// Pool has no instances at all (configuration defect caught earlier).
    EmptyPool,
    /// Every instance is unhealthy, circuit-open, or probe-busy.
    NoEligibleInstances,
}

/// A selected instance, flagged when it is the single half-open probe.
pub struct Selection {
    pub instance: Arc<ServiceInstance>,
    pub is_probe: bool,
}

/// The instance pool for one logical service, with its selection strategy
/// and resilience policy.
#[derive(Debug)]
pub struct ServicePool {
    pub name: String,
    pub strategy: Strategy,
    instances: Vec<Arc<ServiceInstance>>,
    cursor: AtomicUsize,
    weighted_spread: Vec<usize>,
    pub retry: RetrySettings,
    pub per_attempt_timeout: Duration,
}

impl ServicePool {
    pub fn from_settings(settings: &ServiceSettings) -> Self {
        let instances: Vec<Arc<ServiceInstance>> = settings
            .instances
            .iter()
            .map(|i| Arc::new(ServiceInstance::new(i, settings.circuit_breaker.clone())))
            .collect();
        let weighted_spread = load_balancer::build_weighted_spread(&instances);
        Self {
            name: settings.name.clone(),
            strategy: settings.strategy,
            instances,
            cursor: AtomicUsize::new(0),
            weighted_spread,
            retry: settings.retry.clone(),
            per_attempt_timeout: Duration::from_secs(settings.per_attempt_timeout_secs),
        }
    }

    pub fn instances(&self) -> &[Arc<ServiceInstance>] {
        &self.instances
    }

    /// Count of instances currently eligible for normal selection.
    pub fn available_count(&self) -> usize {
        self.instances.iter().filter(|i| i.eligible()).count()
    }

    /// Selects an instance by the configured strategy over the eligible
    /// subset. When nothing is eligible, falls back to claiming a half-open
    /// probe slot; only one probe per instance is ever outstanding.
    pub fn select(&self) -> Result<Selection, SelectError> {
        if self.instances.is_empty() {
            return Err(SelectError::EmptyPool);
        }

        let eligible = |i: &ServiceInstance| i.eligible();
        let picked = match self.strategy {
            Strategy::RoundRobin => {
                load_balancer::select_round_robin(&self.instances, &self.cursor, eligible)
            }
            Strategy::LeastConnections => {
                load_balancer::select_least_connections(&self.instances, &self.cursor, eligible)
            }
            Strategy::Weighted => load_balancer::select_weighted(
                &self.instances,
                &self.weighted_spread,
                &self.cursor,
                eligible,
            ),
            Strategy::Random => load_balancer::select_random(&self.instances, eligible),
        };

        if let Some(idx) = picked {
            return Ok(Selection {
                instance: Arc::clone(&self.instances[idx]),
                is_probe: false,
            });
        }

        // Nothing eligible: one half-open instance may serve as the probe.
        for instance in &self.instances {
            if instance.breaker.try_claim_probe() {
                return Ok(Selection {
                    instance: Arc::clone(instance),
                    is_probe: true,
                });
            }
        }

        Err(SelectError::NoEligibleInstances)
    }
}

/// All configured service pools, keyed by logical service name.
#[derive(Debug)]
pub struct ServiceRegistry {
    pools: AHashMap<String, Arc<ServicePool>>,
}

impl ServiceRegistry {
    pub fn from_settings(services: &[ServiceSettings]) -> Self {
        let pools = services
            .iter()
            .map(|s| (s.name.clone(), Arc::new(ServicePool::from_settings(s))))
            .collect();
        Self { pools }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServicePool>> {
        self.pools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Pools in iteration order, for the health and metrics surfaces.
    pub fn pools(&self) -> impl Iterator<Item = &Arc<ServicePool>> {
        self.pools.values()
    }

    /// Service names, for the inventory endpoint.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::settings::InstanceSettings;

    fn pool(strategy: Strategy, ids: &[&str]) -> ServicePool {
        ServicePool::from_settings(&ServiceSettings {
            name: "users".into(),
            strategy,
            instances: ids
                .iter()
                .map(|id| InstanceSettings {
                    id: id.to_string(),
                    url: format!("http://{}:8080", id),
                    weight: 1,
                })
                .collect(),
            circuit_breaker: BreakerSettings {
                max_failures: 1,
                failure_ratio: 0.5,
                min_requests: 1,
                reset_timeout_secs: 3600,
            },
            retry: RetrySettings::default(),
            per_attempt_timeout_secs: 30,
        })
    }

    #[test]
    fn selects_round_robin_across_pool() {
        let pool = pool(Strategy::RoundRobin, &["a", "b"]);
        let first = pool.select().unwrap();
        let second = pool.select().unwrap();
        assert_ne!(first.instance.id, second.instance.id);
        assert!(!first.is_probe);
    }

    #[test]
    fn open_breaker_excludes_instance() {
        let pool = pool(Strategy::RoundRobin, &["a", "b"]);
        // Trip instance a.
        pool.instances()[0].record_failure();
        assert_eq!(pool.available_count(), 1);
        for _ in 0..4 {
            assert_eq!(pool.select().unwrap().instance.id, "b");
        }
    }

    #[test]
    fn all_open_yields_no_eligible_until_probe_due() {
        let pool = pool(Strategy::RoundRobin, &["a"]);
        pool.instances()[0].record_failure();
        // reset_timeout is an hour out: no probe available yet.
        assert!(matches!(
            pool.select(),
            Err(SelectError::NoEligibleInstances)
        ));
    }

    #[test]
    fn half_open_instance_serves_as_single_probe() {
        let settings = ServiceSettings {
            name: "users".into(),
            strategy: Strategy::RoundRobin,
            instances: vec![InstanceSettings {
                id: "a".into(),
                url: "http://a:8080".into(),
                weight: 1,
            }],
            circuit_breaker: BreakerSettings {
                max_failures: 1,
                failure_ratio: 0.5,
                min_requests: 1,
                reset_timeout_secs: 0,
            },
            retry: RetrySettings::default(),
            per_attempt_timeout_secs: 30,
        };
        let pool = ServicePool::from_settings(&settings);
        pool.instances()[0].record_failure();

        // Immediately due for a probe; exactly one selection succeeds.
        let probe = pool.select().unwrap();
        assert!(probe.is_probe);
        assert!(matches!(
            pool.select(),
            Err(SelectError::NoEligibleInstances)
        ));

        // Probe success closes the breaker and restores normal selection.
        probe.instance.record_success();
        assert!(!pool.select().unwrap().is_probe);
    }

    #[test]
    fn registry_lookup_and_inventory() {
        let registry = ServiceRegistry::from_settings(&[ServiceSettings {
            name: "users".into(),
            strategy: Strategy::RoundRobin,
            instances: vec![InstanceSettings {
                id: "users-1".into(),
                url: "http://users-1:8080".into(),
                weight: 1,
            }],
            circuit_breaker: BreakerSettings::default(),
            retry: RetrySettings::default(),
            per_attempt_timeout_secs: 30,
        }]);
        assert!(registry.get("users").is_some());
        assert!(registry.get("chat").is_none());
        assert_eq!(registry.service_names(), vec!["users".to_string()]);
    }
}
