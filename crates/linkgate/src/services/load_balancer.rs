//! Instance selection strategies.
//!
//! All strategies operate over the pool's instance slice in O(n) without
//! allocating: eligible instances are counted and re-walked by index rather
//! than collected. Eligibility is decided by the caller-supplied predicate
//! (healthy and circuit not open); half-open probes are handled by the pool,
//! not here.

use crate::services::registry::ServiceInstance;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Round-robin over the eligible subset: advance a shared cursor modulo the
/// eligible count, tie-broken by insertion order.
pub fn select_round_robin<F>(
    instances: &[Arc<ServiceInstance>],
    cursor: &AtomicUsize,
    eligible: F,
) -> Option<usize>
where
    F: Fn(&ServiceInstance) -> bool,
{
    let count = instances.iter().filter(|i| eligible(i)).count();
    if count == 0 {
        return None;
    }
    let nth = cursor.fetch_add(1, Ordering::Relaxed) % count;

    let mut seen = 0;
    let mut first_eligible = None;
    for (idx, instance) in instances.iter().enumerate() {
        if eligible(instance) {
            if first_eligible.is_none() {
                first_eligible = Some(idx);
            }
            if seen == nth {
                return Some(idx);
            }
            seen += 1;
        }
    }
    // Eligibility changed between the count and the walk; fall back to the
    // first instance still eligible.
    first_eligible
}

/// Least connections: argmin of in-flight counts over the eligible subset.
/// The walk starts at a rotating offset so ties break round-robin.
pub fn select_least_connections<F>(
    instances: &[Arc<ServiceInstance>],
    cursor: &AtomicUsize,
    eligible: F,
) -> Option<usize>
where
    F: Fn(&ServiceInstance) -> bool,
{
    let len = instances.len();
    if len == 0 {
        return None;
    }
    let start = cursor.fetch_add(1, Ordering::Relaxed) % len;

    let mut best: Option<(usize, u64)> = None;
    for offset in 0..len {
        let idx = (start + offset) % len;
        let instance = &instances[idx];
        if !eligible(instance) {
            continue;
        }
        let in_flight = instance.in_flight();
        match best {
            Some((_, current)) if in_flight >= current => {}
            _ => best = Some((idx, in_flight)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Weighted: walk a precomputed spread of instance indices (each instance
/// appears `weight` times), skipping entries that are no longer eligible.
pub fn select_weighted<F>(
    instances: &[Arc<ServiceInstance>],
    spread: &[usize],
    cursor: &AtomicUsize,
    eligible: F,
) -> Option<usize>
where
    F: Fn(&ServiceInstance) -> bool,
{
    if spread.is_empty() {
        return None;
    }
    let start = cursor.fetch_add(1, Ordering::Relaxed) % spread.len();
    for offset in 0..spread.len() {
        let idx = spread[(start + offset) % spread.len()];
        if eligible(&instances[idx]) {
            return Some(idx);
        }
    }
    None
}

/// Uniform random choice over the eligible subset.
pub fn select_random<F>(instances: &[Arc<ServiceInstance>], eligible: F) -> Option<usize>
where
    F: Fn(&ServiceInstance) -> bool,
{
    use rand::Rng;

    let count = instances.iter().filter(|i| eligible(i)).count();
    if count == 0 {
        return None;
    }
    let nth = rand::thread_rng().gen_range(0..count);

    let mut seen = 0;
    let mut first_eligible = None;
    for (idx, instance) in instances.iter().enumerate() {
        if eligible(instance) {
            if first_eligible.is_none() {
                first_eligible = Some(idx);
            }
            if seen == nth {
                return Some(idx);
            }
            seen += 1;
        }
    }
    first_eligible
}

/// Builds the weighted spread: each instance index repeated `weight` times,
/// interleaved round by round so a heavy instance does not monopolize a
/// burst. Rebuilt only when pool membership changes (configuration load).
pub fn build_weighted_spread(instances: &[Arc<ServiceInstance>]) -> Vec<usize> {
    let max_weight = instances.iter().map(|i| i.weight).max().unwrap_or(0);
    let mut spread = Vec::with_capacity(instances.iter().map(|i| i.weight as usize).sum());
    for round in 0..max_weight {
        for (idx, instance) in instances.iter().enumerate() {
            if instance.weight > round {
                spread.push(idx);
            }
        }
    }
    spread
}
