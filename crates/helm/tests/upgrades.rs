//! Migrations, rollbacks and emergency upgrades through the governor.

mod common;

use common::{ADMIN, DAY, Harness, genesis_data, handle, v};
use helm::{
    GovernanceParams, HelmError, KernelError, MigrationPlan, MigrationStep, PlanKey, StepError,
    UpgradeOutcome, UpgradeSource, UpgradeStatus, Value,
};

fn rename(from: &str, to: &str) -> MigrationStep {
    MigrationStep::Rename {
        from: from.to_string(),
        to: to.to_string(),
    }
}

fn increment(key: &str, delta: i64) -> MigrationStep {
    MigrationStep::Increment {
        key: key.to_string(),
        delta,
    }
}

// ============================================================================
// Migrations
// ============================================================================

#[test]
fn governed_upgrade_applies_its_migration() {
    let h = Harness::new();
    let key = h.register(
        MigrationPlan::new(v(1, 2, 0), v(1, 3, 0), vec![rename("owner", "holder")]).reversible(),
    );

    let tx = h.upgrade(v(1, 3, 0), Some(key));
    assert_eq!(tx.migration, Some(key));

    let data = h.governor.data().unwrap();
    assert_eq!(data.get("holder"), Some(&Value::from("alice")));
    assert!(!data.contains_key("owner"));
    assert_eq!(h.governor.migration_plan(&key).unwrap().unwrap().steps.len(), 1);
}

#[test]
fn failed_migration_leaves_data_and_proxy_untouched() {
    let h = Harness::new();
    let key = h.register(MigrationPlan::new(
        v(1, 2, 0),
        v(1, 3, 0),
        vec![
            increment("balance", 5),
            MigrationStep::Rewrite {
                key: "owner".to_string(),
                from: Value::from("bob"),
                to: Value::from("carol"),
            },
        ],
    ));
    let id = h.approve(v(1, 3, 0), Some(key));

    let data_hash = h.governor.snapshot().unwrap().compute_data_hash();
    let proxy = h.governor.proxy_info().unwrap();

    let failure = match h.governor.execute_upgrade(ADMIN, id).unwrap_err() {
        HelmError::Kernel(KernelError::MigrationFailed(failure)) => failure,
        other => panic!("expected a migration failure, got {other}"),
    };
    assert_eq!(failure.key, key);
    assert_eq!(failure.step, 1);
    assert!(matches!(failure.reason, StepError::ValueMismatch { .. }));

    // The first step ran on a staged copy only
    assert_eq!(h.governor.snapshot().unwrap().compute_data_hash(), data_hash);
    assert_eq!(h.governor.data().unwrap(), genesis_data());
    assert_eq!(h.governor.current_version().unwrap(), v(1, 2, 0));
    assert_eq!(h.governor.proxy_info().unwrap(), proxy);

    // The attempt itself is on record
    assert_eq!(
        h.governor.proposal(id).unwrap().unwrap().status,
        UpgradeStatus::Failed
    );
    let log = h.governor.audit_log().unwrap();
    assert_eq!(log.len(), 1);
    assert!(matches!(log[0].outcome, UpgradeOutcome::Failed { .. }));
    assert_eq!(log[0].proposal_id, Some(id));
}

#[test]
fn duplicate_plans_are_rejected() {
    let h = Harness::new();
    let plan = MigrationPlan::new(v(1, 2, 0), v(1, 3, 0), vec![increment("balance", 1)]);
    h.register(plan.clone());

    let err = h.governor.register_migration_plan(ADMIN, plan).unwrap_err();
    assert!(matches!(err, HelmError::Kernel(KernelError::DuplicatePlan(_))));

    let err = h
        .governor
        .register_migration_plan(
            ADMIN,
            MigrationPlan::new(v(1, 2, 0), v(1, 4, 0), vec![MigrationStep::Remove {
                key: "owner".to_string(),
            }])
            .reversible(),
        )
        .unwrap_err();
    assert!(matches!(err, HelmError::Kernel(KernelError::InvalidPlan { .. })));
}

// ============================================================================
// Rollback
// ============================================================================

#[test]
fn rollback_restores_data_through_inverse_migrations() {
    let h = Harness::new();
    let first = h.register(
        MigrationPlan::new(v(1, 2, 0), v(1, 3, 0), vec![rename("owner", "holder")]).reversible(),
    );
    let second = h.register(
        MigrationPlan::new(v(1, 3, 0), v(1, 4, 0), vec![increment("balance", 50)]).reversible(),
    );
    h.upgrade(v(1, 3, 0), Some(first));
    h.upgrade(v(1, 4, 0), Some(second));
    assert_eq!(h.governor.data().unwrap().get("balance"), Some(&Value::Int(150)));

    let tx = h.governor.rollback_to_version(ADMIN, v(1, 2, 0)).unwrap();
    assert_eq!(tx.source, UpgradeSource::Rollback);
    assert_eq!(tx.from_version, v(1, 4, 0));
    assert_eq!(tx.to_version, v(1, 2, 0));
    assert_eq!(tx.to_implementation.as_str(), handle(v(1, 2, 0)));

    assert_eq!(h.governor.data().unwrap(), genesis_data());
    assert_eq!(h.governor.current_version().unwrap(), v(1, 2, 0));
    assert_eq!(h.call("alice", "whoami"), "alice@1.2.0");

    // History is appended, never rewritten
    let log = h.governor.audit_log().unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log[2], tx);
    assert_eq!(h.governor.proxy_info().unwrap().generation, 3);
}

#[test]
fn rollback_beyond_the_window_fails() {
    let h = Harness::with_params(GovernanceParams::default().with_rollback_window(2));
    h.upgrade(v(1, 3, 0), None);
    h.upgrade(v(1, 4, 0), None);
    h.upgrade(v(1, 5, 0), None);

    let before = h.governor.state_hash().unwrap();
    let err = h.governor.rollback_to_version(ADMIN, v(1, 2, 0)).unwrap_err();
    assert!(matches!(
        err,
        HelmError::Kernel(KernelError::RollbackWindowExceeded { window: 2, .. })
    ));
    assert_eq!(h.governor.state_hash().unwrap(), before);

    h.governor.rollback_to_version(ADMIN, v(1, 3, 0)).unwrap();
    assert_eq!(h.governor.current_version().unwrap(), v(1, 3, 0));
}

#[test]
fn rollback_can_step_back_one_version_at_a_time() {
    let h = Harness::new();
    let key = h.register(
        MigrationPlan::new(v(1, 2, 0), v(1, 3, 0), vec![rename("owner", "holder")]).reversible(),
    );
    h.upgrade(v(1, 3, 0), Some(key));
    h.upgrade(v(1, 4, 0), None);

    h.governor.rollback_to_version(ADMIN, v(1, 3, 0)).unwrap();
    assert_eq!(h.call("alice", "whoami"), "alice@1.3.0");

    let tx = h.governor.rollback_to_version(ADMIN, v(1, 2, 0)).unwrap();
    assert_eq!(tx.from_version, v(1, 3, 0));
    assert_eq!(tx.to_implementation.as_str(), handle(v(1, 2, 0)));
    assert_eq!(h.governor.data().unwrap(), genesis_data());
    assert_eq!(h.governor.audit_log().unwrap().len(), 4);
}

#[test]
fn irreversible_migrations_block_rollback() {
    let h = Harness::new();
    let key = h.register(MigrationPlan::new(
        v(1, 2, 0),
        v(1, 3, 0),
        vec![MigrationStep::Remove {
            key: "owner".to_string(),
        }],
    ));
    h.upgrade(v(1, 3, 0), Some(key));

    let before = h.governor.state_hash().unwrap();
    let err = h.governor.rollback_to_version(ADMIN, v(1, 2, 0)).unwrap_err();
    assert!(matches!(
        err,
        HelmError::Kernel(KernelError::IrreversibleMigration(k)) if k == key
    ));
    assert_eq!(h.governor.state_hash().unwrap(), before);
}

#[test]
fn only_the_admin_rolls_back() {
    let h = Harness::new();
    h.upgrade(v(1, 3, 0), None);

    let err = h.governor.rollback_to_version("alice", v(1, 2, 0)).unwrap_err();
    assert!(matches!(err, HelmError::Kernel(KernelError::Unauthorized { .. })));
}

// ============================================================================
// Emergency
// ============================================================================

#[test]
fn emergency_upgrade_requires_emergency_mode() {
    let h = Harness::new();
    h.deploy(v(1, 2, 1));

    let before = h.governor.state_hash().unwrap();
    let err = h
        .governor
        .emergency_upgrade(ADMIN, handle(v(1, 2, 1)), v(1, 2, 1))
        .unwrap_err();
    assert!(matches!(err, HelmError::Kernel(KernelError::EmergencyModeDisabled)));
    assert_eq!(h.governor.state_hash().unwrap(), before);
}

#[test]
fn emergency_upgrade_bypasses_voting_until_expiry() {
    let h = Harness::new();
    h.deploy(v(1, 2, 1));
    h.deploy(v(1, 2, 2));

    let status = h.governor.enable_emergency_mode(ADMIN).unwrap();
    assert!(status.active);
    assert!(h.governor.emergency_status().unwrap().active);

    let tx = h
        .governor
        .emergency_upgrade(ADMIN, handle(v(1, 2, 1)), v(1, 2, 1))
        .unwrap();
    assert_eq!(tx.source, UpgradeSource::Emergency);
    assert_eq!(tx.proposal_id, None);
    assert_eq!(h.governor.current_version().unwrap(), v(1, 2, 1));

    // The window closes on its own
    h.advance(DAY);
    assert!(!h.governor.emergency_status().unwrap().active);
    let err = h
        .governor
        .emergency_upgrade(ADMIN, handle(v(1, 2, 2)), v(1, 2, 2))
        .unwrap_err();
    assert!(matches!(err, HelmError::Kernel(KernelError::EmergencyModeDisabled)));
    assert_eq!(h.governor.emergency_status().unwrap().expires_at, None);
}

#[test]
fn emergency_upgrade_stays_within_one_major() {
    let h = Harness::new();
    h.deploy(v(2, 0, 0));
    h.governor.enable_emergency_mode(ADMIN).unwrap();

    let err = h
        .governor
        .emergency_upgrade(ADMIN, handle(v(2, 0, 0)), v(2, 0, 0))
        .unwrap_err();
    assert!(matches!(err, HelmError::Kernel(KernelError::IncompatibleVersion { .. })));
    assert_eq!(h.governor.current_version().unwrap(), v(1, 2, 0));
}

#[test]
fn emergency_upgrade_runs_the_registered_plan() {
    let h = Harness::new();
    let key = h.register(MigrationPlan::new(
        v(1, 2, 0),
        v(1, 2, 1),
        vec![increment("balance", -100)],
    ));
    h.deploy(v(1, 2, 1));
    h.governor.enable_emergency_mode(ADMIN).unwrap();

    let tx = h
        .governor
        .emergency_upgrade(ADMIN, handle(v(1, 2, 1)), v(1, 2, 1))
        .unwrap();
    assert_eq!(tx.migration, Some(PlanKey::new(v(1, 2, 0), v(1, 2, 1))));
    assert_eq!(tx.migration, Some(key));
    assert_eq!(h.governor.data().unwrap().get("balance"), Some(&Value::Int(0)));
}

#[test]
fn emergency_upgrade_needs_deployed_code() {
    let h = Harness::new();
    h.governor.enable_emergency_mode(ADMIN).unwrap();

    let err = h
        .governor
        .emergency_upgrade(ADMIN, "impl-unknown", v(1, 2, 1))
        .unwrap_err();
    assert!(matches!(err, HelmError::UnknownImplementation(_)));
    assert_eq!(h.governor.current_version().unwrap(), v(1, 2, 0));
}

#[test]
fn disabling_emergency_mode_takes_effect_immediately() {
    let h = Harness::new();
    h.deploy(v(1, 2, 1));
    h.governor.enable_emergency_mode(ADMIN).unwrap();
    h.governor.disable_emergency_mode(ADMIN).unwrap();

    let err = h
        .governor
        .emergency_upgrade(ADMIN, handle(v(1, 2, 1)), v(1, 2, 1))
        .unwrap_err();
    assert!(matches!(err, HelmError::Kernel(KernelError::EmergencyModeDisabled)));
}
