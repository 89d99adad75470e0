//! Effects produced by the kernel.
//!
//! Effects describe what changed so the shell can log, publish, or persist
//! it. The kernel is pure - it produces effects but never executes them.

use helm_types::{
    Identity, ImplementationRef, ProposalId, Timestamp, UpgradeSource, UpgradeStatus, Version,
};
use serde::{Deserialize, Serialize};

use crate::access::Role;
use crate::audit::UpgradeTransaction;
use crate::migration::{MigrationError, PlanKey};

/// An effect to be executed by the shell.
///
/// Produced by [`super::kernel::apply_committed`], in the order the changes
/// happened within the command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    // ========================================================================
    // Proposal lifecycle
    // ========================================================================
    ProposalCreated {
        proposal_id: ProposalId,
        proposer: Identity,
        target_version: Version,
        implementation: ImplementationRef,
        voting_deadline: Timestamp,
    },

    VoteRecorded {
        proposal_id: ProposalId,
        voter: Identity,
        support: bool,
        votes_for: u32,
        votes_against: u32,
    },

    /// A proposal moved to a new status through voting or execution.
    ProposalResolved {
        proposal_id: ProposalId,
        status: UpgradeStatus,
    },

    ProposalCancelled {
        proposal_id: ProposalId,
        cancelled_by: Identity,
    },

    // ========================================================================
    // Migrations
    // ========================================================================
    PlanRegistered {
        key: PlanKey,
        steps: usize,
        reversible: bool,
    },

    /// A plan (or a derived inverse) was applied to the data store.
    MigrationApplied { key: PlanKey, steps: usize },

    /// A migration failed and nothing was written.
    MigrationAborted { error: MigrationError },

    // ========================================================================
    // Version and proxy
    // ========================================================================
    VersionChanged {
        from: Version,
        to: Version,
        source: UpgradeSource,
    },

    ImplementationSwapped {
        from: ImplementationRef,
        to: ImplementationRef,
        generation: u64,
    },

    /// Append an entry to the immutable audit log.
    AuditLogAppend(UpgradeTransaction),

    EmergencyModeChanged {
        enabled: bool,
        expires_at: Option<Timestamp>,
    },

    AdminTransferred { from: Identity, to: Identity },

    PauseChanged { paused: bool },

    RoleChanged {
        identity: Identity,
        role: Role,
        granted: bool,
    },

    /// A forwarded call's writes were committed.
    DataCommitted {
        caller: Identity,
        implementation: ImplementationRef,
        keys: usize,
    },
}

impl Effect {
    /// Short name for logs and event streams.
    pub fn kind(&self) -> &'static str {
        match self {
            Effect::ProposalCreated { .. } => "proposal_created",
            Effect::VoteRecorded { .. } => "vote_recorded",
            Effect::ProposalResolved { .. } => "proposal_resolved",
            Effect::ProposalCancelled { .. } => "proposal_cancelled",
            Effect::PlanRegistered { .. } => "plan_registered",
            Effect::MigrationApplied { .. } => "migration_applied",
            Effect::MigrationAborted { .. } => "migration_aborted",
            Effect::VersionChanged { .. } => "version_changed",
            Effect::ImplementationSwapped { .. } => "implementation_swapped",
            Effect::AuditLogAppend(_) => "audit_log_append",
            Effect::EmergencyModeChanged { .. } => "emergency_mode_changed",
            Effect::AdminTransferred { .. } => "admin_transferred",
            Effect::PauseChanged { .. } => "pause_changed",
            Effect::RoleChanged { .. } => "role_changed",
            Effect::DataCommitted { .. } => "data_committed",
        }
    }
}
