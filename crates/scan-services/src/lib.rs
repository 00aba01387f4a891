// SPDX-License-Identifier: MIT OR Apache-2.0
//! Worked example service adapters, used to exercise every per-context and
//! cross-context scheduler invariant end to end.
//!
//! The ~30 real per-service adapters that a production scan would carry
//! are out of scope; [`iam_service`] and [`diamond_service`]
//! stand in for that population, each grounded on one of two boundary
//! scenarios. [`cyclic_service`] exists only to exercise
//! the registry's cycle-detection failure path.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cyclic;
mod diamond;
mod iam;

pub use cyclic::cyclic_service;
pub use diamond::{A, B, C, D, diamond_service};
pub use iam::{PolicyDoc, Policies, Users, iam_service};

#[cfg(test)]
mod tests {
    use super::*;
    use scan_registry::compile;
    use scan_scheduler::Coordinator;
    use scan_scheduler::cancel::CancellationToken;
    use scan_scheduler::coordinator::ContextSpec;
    use std::sync::Arc;

    #[tokio::test]
    async fn iam_scenario_runs_end_to_end_through_the_coordinator() {
        let registry = Arc::new(compile(iam_service()).unwrap());
        let spec = ContextSpec {
            account: "123456789012".to_string(),
            region: "us-east-1".to_string(),
            service: "iam".to_string(),
            registry,
            mode: scan_core::Mode::NONE,
        };
        let coordinator = Coordinator::new(vec![spec], 8, CancellationToken::new());
        let maps = coordinator.run().await;
        assert_eq!(maps.len(), 1);
        let map = &maps[0];
        assert_eq!(map.calls["ListUsers"].len(), 1);
        assert_eq!(map.calls["ListUserPolicies"].len(), 3, "one per user: alice, bob, carol");
        assert_eq!(
            map.calls["GetUserPolicy"].len(),
            5,
            "alice's 2 own policies + shared AdministratorAccess, bob's 1 own policy + shared AdministratorAccess, carol has none"
        );
        assert!(
            map.calls["GetUserPolicy"].iter().all(|c| c.err.is_none()),
            "alice and bob sharing an AdministratorAccess policy name must not collide on call id"
        );
    }

    #[tokio::test]
    async fn diamond_scenario_produces_cartesian_product_through_the_coordinator() {
        let registry = Arc::new(compile(diamond_service()).unwrap());
        let spec = ContextSpec {
            account: "123456789012".to_string(),
            region: "us-east-1".to_string(),
            service: "diamond".to_string(),
            registry,
            mode: scan_core::Mode::NONE,
        };
        let coordinator = Coordinator::new(vec![spec], 4, CancellationToken::new());
        let maps = coordinator.run().await;
        let map = &maps[0];
        assert_eq!(map.calls["B"].len(), 2);
        assert_eq!(map.calls["C"].len(), 2);
        assert_eq!(map.calls["D"].len(), 4, "|B.out| x |C.out| = 2x2");
    }
}
