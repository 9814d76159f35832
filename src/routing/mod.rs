//! # Routing Policy
//!
//! The per-operation routing decision: given an operation descriptor and the
//! currently eligible replica set, pick the endpoint that serves it.
//!
//! Decision rules, in priority order:
//!
//! 1. Writes always go to the primary. Hints are ignored for writes.
//! 2. A hint naming the primary or an eligible replica is honored. An
//!    unsatisfiable hint falls back to the primary with a warning log; the
//!    caller never sees an error for it.
//! 3. Reads with a non-empty eligible set go to a replica chosen by the
//!    configured load balancer.
//! 4. Anything else goes to the primary.
//!
//! The decision is deterministic given its inputs, except for the
//! round-robin cursor, the only mutable state in this module.

use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

use crate::config::LoadBalancingStrategy;
use crate::endpoint::{EndpointId, OperationDescriptor, OperationKind};
use crate::error::RouterError;

/// Outcome of a routing decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    Primary,
    Replica(EndpointId),
}

/// Tie-break strategy for picking one replica among several eligible ones
pub trait LoadBalancer: Send + Sync {
    fn pick(&self, eligible: &[EndpointId]) -> Option<EndpointId>;
}

/// Rotates through eligible replicas in order. The cursor advances
/// monotonically and wraps on overflow.
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for RoundRobin {
    fn pick(&self, eligible: &[EndpointId]) -> Option<EndpointId> {
        if eligible.is_empty() {
            return None;
        }
        let position = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(eligible[position % eligible.len()].clone())
    }
}

/// Uniform random pick among eligible replicas
pub struct Random;

impl LoadBalancer for Random {
    fn pick(&self, eligible: &[EndpointId]) -> Option<EndpointId> {
        if eligible.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..eligible.len());
        Some(eligible[index].clone())
    }
}

/// Routing decision engine for one configured topology
pub struct RoutingPolicy {
    primary: EndpointId,
    balancer: Box<dyn LoadBalancer>,
}

impl RoutingPolicy {
    pub fn new(primary: EndpointId, strategy: LoadBalancingStrategy) -> Self {
        let balancer: Box<dyn LoadBalancer> = match strategy {
            LoadBalancingStrategy::RoundRobin => Box::new(RoundRobin::new()),
            LoadBalancingStrategy::Random => Box::new(Random),
        };
        Self { primary, balancer }
    }

    pub fn primary(&self) -> &EndpointId {
        &self.primary
    }

    /// Select the endpoint serving this operation.
    pub fn route(&self, operation: &OperationDescriptor, eligible: &[EndpointId]) -> RouteTarget {
        if operation.kind == OperationKind::Write {
            return RouteTarget::Primary;
        }

        if let Some(hint) = &operation.hint {
            if *hint == self.primary {
                return RouteTarget::Primary;
            }
            if eligible.contains(hint) {
                return RouteTarget::Replica(hint.clone());
            }
            // Recovered locally: fall back to primary rather than failing the read
            let error = RouterError::RoutingHintUnsatisfiable { hint: hint.clone() };
            warn!(error = %error, "Routing hint not satisfiable, falling back to primary");
            return RouteTarget::Primary;
        }

        match self.balancer.pick(eligible) {
            Some(endpoint) => RouteTarget::Replica(endpoint),
            None => RouteTarget::Primary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<EndpointId> {
        names.iter().map(|name| EndpointId::new(*name)).collect()
    }

    fn policy() -> RoutingPolicy {
        RoutingPolicy::new(EndpointId::new("primary"), LoadBalancingStrategy::RoundRobin)
    }

    #[test]
    fn test_writes_always_route_to_primary() {
        let policy = policy();
        let eligible = ids(&["replica-1", "replica-2"]);

        let plain = OperationDescriptor::write();
        assert_eq!(policy.route(&plain, &eligible), RouteTarget::Primary);

        // A hint never redirects a write
        let hinted = OperationDescriptor::write().with_hint(EndpointId::new("replica-1"));
        assert_eq!(policy.route(&hinted, &eligible), RouteTarget::Primary);
    }

    #[test]
    fn test_reads_round_robin_across_eligible_and_wrap() {
        let policy = policy();
        let eligible = ids(&["replica-1", "replica-2", "replica-3"]);
        let op = OperationDescriptor::read();

        let picks: Vec<RouteTarget> = (0..6).map(|_| policy.route(&op, &eligible)).collect();
        let expected: Vec<RouteTarget> = ["replica-1", "replica-2", "replica-3"]
            .iter()
            .cycle()
            .take(6)
            .map(|name| RouteTarget::Replica(EndpointId::new(*name)))
            .collect();
        assert_eq!(picks, expected);
    }

    #[test]
    fn test_reads_never_hit_primary_while_replicas_eligible() {
        let policy = policy();
        let eligible = ids(&["replica-1", "replica-2"]);
        let op = OperationDescriptor::read();

        for _ in 0..20 {
            assert_ne!(policy.route(&op, &eligible), RouteTarget::Primary);
        }
    }

    #[test]
    fn test_empty_eligible_set_falls_back_to_primary() {
        let policy = policy();
        let op = OperationDescriptor::read();
        assert_eq!(policy.route(&op, &[]), RouteTarget::Primary);
    }

    #[test]
    fn test_hint_honored_for_eligible_replica() {
        let policy = policy();
        let eligible = ids(&["replica-1", "replica-2"]);
        let op = OperationDescriptor::read().with_hint(EndpointId::new("replica-2"));
        assert_eq!(
            policy.route(&op, &eligible),
            RouteTarget::Replica(EndpointId::new("replica-2"))
        );
    }

    #[test]
    fn test_hint_naming_primary_is_honored() {
        let policy = policy();
        let eligible = ids(&["replica-1"]);
        let op = OperationDescriptor::read().with_hint(EndpointId::new("primary"));
        assert_eq!(policy.route(&op, &eligible), RouteTarget::Primary);
    }

    #[test]
    fn test_unsatisfiable_hint_falls_back_to_primary() {
        let policy = policy();
        let eligible = ids(&["replica-1"]);

        // Hinted replica exists but is not eligible right now
        let op = OperationDescriptor::read().with_hint(EndpointId::new("replica-9"));
        assert_eq!(policy.route(&op, &eligible), RouteTarget::Primary);
    }

    #[test]
    fn test_round_robin_cursor_wraps_on_overflow() {
        let balancer = RoundRobin {
            cursor: AtomicUsize::new(usize::MAX),
        };
        let eligible = ids(&["replica-1", "replica-2"]);

        // usize::MAX % 2 == 1, then the cursor wraps to 0
        assert_eq!(
            balancer.pick(&eligible),
            Some(EndpointId::new("replica-2"))
        );
        assert_eq!(
            balancer.pick(&eligible),
            Some(EndpointId::new("replica-1"))
        );
    }

    #[test]
    fn test_random_balancer_only_picks_eligible() {
        let balancer = Random;
        let eligible = ids(&["replica-1", "replica-2", "replica-3"]);
        for _ in 0..50 {
            let pick = balancer.pick(&eligible).unwrap();
            assert!(eligible.contains(&pick));
        }
        assert_eq!(balancer.pick(&[]), None);
    }
}
