//! Pool-level load balancing tests.

use linkgate::models::settings::{
    BreakerSettings, InstanceSettings, RetrySettings, ServiceSettings, Strategy,
};
use linkgate::services::registry::{SelectError, ServicePool};
use std::collections::HashMap;

fn pool_settings(strategy: Strategy, specs: &[(&str, u32)]) -> ServiceSettings {
    ServiceSettings {
        name: "users".into(),
        strategy,
        instances: specs
            .iter()
            .map(|(id, weight)| InstanceSettings {
                id: id.to_string(),
                url: format!("http://{}:8080", id),
                weight: *weight,
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
    }
}

fn distribution(pool: &ServicePool, picks: usize) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for _ in 0..picks {
        let selection = pool.select().unwrap();
        *counts.entry(selection.instance.id.clone()).or_insert(0) += 1;
    }
    counts
}

#[test]
fn round_robin_is_even() {
    let pool = ServicePool::from_settings(&pool_settings(
        Strategy::RoundRobin,
        &[("a", 1), ("b", 1), ("c", 1)],
    ));
    let counts = distribution(&pool, 9);
    assert_eq!(counts["a"], 3);
    assert_eq!(counts["b"], 3);
    assert_eq!(counts["c"], 3);
}

#[test]
fn weighted_follows_configured_weights() {
    let pool = ServicePool::from_settings(&pool_settings(
        Strategy::Weighted,
        &[("heavy", 3), ("light", 1)],
    ));
    let counts = distribution(&pool, 8);
    assert_eq!(counts["heavy"], 6);
    assert_eq!(counts["light"], 2);
}

#[test]
fn least_connections_drains_to_idle_instance() {
    let pool = ServicePool::from_settings(&pool_settings(
        Strategy::LeastConnections,
        &[("a", 1), ("b", 1)],
    ));
    // Saturate a.
    pool.instances()[0].begin_request();
    pool.instances()[0].begin_request();
    for _ in 0..4 {
        assert_eq!(pool.select().unwrap().instance.id, "b");
        // select does not change in-flight counts by itself.
    }
}

#[test]
fn random_covers_all_eligible_instances() {
    let pool = ServicePool::from_settings(&pool_settings(
        Strategy::Random,
        &[("a", 1), ("b", 1), ("c", 1)],
    ));
    let counts = distribution(&pool, 300);
    assert_eq!(counts.len(), 3);
    for (_, count) in counts {
        assert!(count > 0);
    }
}

#[test]
fn tripped_instances_are_skipped_until_none_remain() {
    let pool = ServicePool::from_settings(&pool_settings(
        Strategy::RoundRobin,
        &[("a", 1), ("b", 1)],
    ));
    pool.instances()[0].record_failure();
    for _ in 0..3 {
        assert_eq!(pool.select().unwrap().instance.id, "b");
    }

    pool.instances()[1].record_failure();
    assert!(matches!(
        pool.select(),
        Err(SelectError::NoEligibleInstances)
    ));
}
