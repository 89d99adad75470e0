//! RollbackManager: reverting to a recent version along the audited path.
//!
//! The window counts successful upgrade hops on the live path, newest first.
//! A rollback walks back over at most `window` hops until it reaches a hop
//! that started from the target version. Earlier rollback transactions are
//! not hops themselves; the forward hops they reverted no longer end at the
//! cursor and are stepped over, so rolling back in several steps reaches the
//! same versions as one long rollback.
//!
//! Each hop must be reversible. A hop without a plan changed only code, so
//! it reverts as the identity migration.

use helm_types::{ImplementationRef, UpgradeSource, Version};

use crate::audit::AuditLog;
use crate::kernel::KernelError;
use crate::migration::{MigrationPlan, MigrationRegistry, PlanKey};

/// The resolved inverse path for a rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackPath {
    /// Inverse plans to apply in order, newest hop first.
    pub inverse_plans: Vec<MigrationPlan>,
    /// Forward plans the inverses were derived from, newest first.
    pub reverted_plans: Vec<PlanKey>,
    /// Implementation that was live at `target`.
    pub implementation: ImplementationRef,
    /// Number of upgrade hops being reverted.
    pub hops: usize,
}

/// Resolves how to get from `current` back to `target`.
pub fn plan_rollback(
    log: &AuditLog,
    plans: &MigrationRegistry,
    current: Version,
    target: Version,
    window: u32,
) -> Result<RollbackPath, KernelError> {
    // Precondition: rollback only ever moves backwards
    if target >= current {
        return Err(KernelError::InvalidVersion {
            target,
            reason: format!("rollback target must be older than current version {current}"),
        });
    }

    let mut inverse_plans = Vec::new();
    let mut reverted_plans = Vec::new();
    let mut hops = 0usize;
    let mut cursor = current;

    let live_path = log
        .iter()
        .rev()
        .filter(|tx| tx.is_success() && tx.source != UpgradeSource::Rollback);

    for tx in live_path {
        // Reverted by a later rollback
        if tx.to_version != cursor {
            continue;
        }
        if hops == window as usize {
            break;
        }

        if let Some(key) = tx.migration {
            let plan = plans.get(&key).ok_or(KernelError::PlanNotFound(key))?;
            let inverse = plan
                .inverse()
                .ok_or(KernelError::IrreversibleMigration(key))?;
            inverse_plans.push(inverse);
            reverted_plans.push(key);
        }

        hops += 1;
        cursor = tx.from_version;

        if cursor == target {
            // Postcondition: never more hops than the window allows
            assert!(hops <= window as usize);
            return Ok(RollbackPath {
                inverse_plans,
                reverted_plans,
                implementation: tx.from_implementation.clone(),
                hops,
            });
        }
    }

    let ever_recorded = log
        .iter()
        .filter(|tx| tx.is_success())
        .any(|tx| tx.from_version == target || tx.to_version == target);

    if ever_recorded {
        Err(KernelError::RollbackWindowExceeded { target, window })
    } else {
        Err(KernelError::InvalidVersion {
            target,
            reason: "version was never active".to_string(),
        })
    }
}
