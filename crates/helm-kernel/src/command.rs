//! Commands accepted by the kernel.
//!
//! A command is a fully-specified request from an authenticated caller. The
//! shell builds one per public operation and hands it to
//! [`crate::apply_committed`] together with the current time.

use helm_types::{Identity, ImplementationRef, ProposalId, Version};
use serde::{Deserialize, Serialize};

use crate::access::Role;
use crate::migration::{DataStore, MigrationPlan, PlanKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    // ========================================================================
    // Housekeeping
    // ========================================================================
    /// Resolves every `Pending` proposal whose deadline has passed and
    /// clears an expired emergency window.
    ResolveExpired,

    // ========================================================================
    // Governance
    // ========================================================================
    ProposeUpgrade {
        proposer: Identity,
        target_version: Version,
        implementation: ImplementationRef,
        migration: Option<PlanKey>,
        description: String,
    },

    Vote {
        voter: Identity,
        proposal_id: ProposalId,
        support: bool,
    },

    /// Resolves a proposal now if its outcome can no longer change.
    Tally {
        caller: Identity,
        proposal_id: ProposalId,
    },

    ExecuteUpgrade {
        executor: Identity,
        proposal_id: ProposalId,
    },

    CancelProposal {
        caller: Identity,
        proposal_id: ProposalId,
    },

    RegisterPlan {
        caller: Identity,
        plan: MigrationPlan,
    },

    // ========================================================================
    // Emergency and rollback
    // ========================================================================
    SetEmergencyMode {
        admin: Identity,
        enabled: bool,
    },

    EmergencyUpgrade {
        admin: Identity,
        implementation: ImplementationRef,
        target_version: Version,
    },

    Rollback {
        admin: Identity,
        target_version: Version,
    },

    // ========================================================================
    // Proxy administration
    // ========================================================================
    TransferAdmin {
        admin: Identity,
        new_admin: Identity,
    },

    SetPaused {
        admin: Identity,
        paused: bool,
    },

    GrantRole {
        admin: Identity,
        identity: Identity,
        role: Role,
    },

    RevokeRole {
        admin: Identity,
        identity: Identity,
        role: Role,
    },

    // ========================================================================
    // Forwarded calls
    // ========================================================================
    /// Commits the data produced by a forwarded call.
    ///
    /// `implementation` is the handle the call ran against; the commit fails
    /// if the proxy no longer points there.
    CommitCall {
        caller: Identity,
        implementation: ImplementationRef,
        data: DataStore,
    },
}

impl Command {
    pub fn propose(
        proposer: impl Into<Identity>,
        target_version: Version,
        implementation: impl Into<ImplementationRef>,
        migration: Option<PlanKey>,
        description: impl Into<String>,
    ) -> Self {
        Command::ProposeUpgrade {
            proposer: proposer.into(),
            target_version,
            implementation: implementation.into(),
            migration,
            description: description.into(),
        }
    }

    pub fn vote(voter: impl Into<Identity>, proposal_id: ProposalId, support: bool) -> Self {
        Command::Vote {
            voter: voter.into(),
            proposal_id,
            support,
        }
    }

    pub fn tally(caller: impl Into<Identity>, proposal_id: ProposalId) -> Self {
        Command::Tally {
            caller: caller.into(),
            proposal_id,
        }
    }

    pub fn execute(executor: impl Into<Identity>, proposal_id: ProposalId) -> Self {
        Command::ExecuteUpgrade {
            executor: executor.into(),
            proposal_id,
        }
    }

    pub fn cancel(caller: impl Into<Identity>, proposal_id: ProposalId) -> Self {
        Command::CancelProposal {
            caller: caller.into(),
            proposal_id,
        }
    }

    pub fn register_plan(caller: impl Into<Identity>, plan: MigrationPlan) -> Self {
        Command::RegisterPlan {
            caller: caller.into(),
            plan,
        }
    }

    pub fn emergency_mode(admin: impl Into<Identity>, enabled: bool) -> Self {
        Command::SetEmergencyMode {
            admin: admin.into(),
            enabled,
        }
    }

    pub fn emergency_upgrade(
        admin: impl Into<Identity>,
        implementation: impl Into<ImplementationRef>,
        target_version: Version,
    ) -> Self {
        Command::EmergencyUpgrade {
            admin: admin.into(),
            implementation: implementation.into(),
            target_version,
        }
    }

    pub fn rollback(admin: impl Into<Identity>, target_version: Version) -> Self {
        Command::Rollback {
            admin: admin.into(),
            target_version,
        }
    }

    pub fn transfer_admin(admin: impl Into<Identity>, new_admin: impl Into<Identity>) -> Self {
        Command::TransferAdmin {
            admin: admin.into(),
            new_admin: new_admin.into(),
        }
    }

    pub fn set_paused(admin: impl Into<Identity>, paused: bool) -> Self {
        Command::SetPaused {
            admin: admin.into(),
            paused,
        }
    }

    pub fn grant_role(
        admin: impl Into<Identity>,
        identity: impl Into<Identity>,
        role: Role,
    ) -> Self {
        Command::GrantRole {
            admin: admin.into(),
            identity: identity.into(),
            role,
        }
    }

    pub fn revoke_role(
        admin: impl Into<Identity>,
        identity: impl Into<Identity>,
        role: Role,
    ) -> Self {
        Command::RevokeRole {
            admin: admin.into(),
            identity: identity.into(),
            role,
        }
    }

    /// Short operation name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Command::ResolveExpired => "resolve_expired",
            Command::ProposeUpgrade { .. } => "propose_upgrade",
            Command::Vote { .. } => "vote_on_proposal",
            Command::Tally { .. } => "tally",
            Command::ExecuteUpgrade { .. } => "execute_upgrade",
            Command::CancelProposal { .. } => "cancel_proposal",
            Command::RegisterPlan { .. } => "register_migration_plan",
            Command::SetEmergencyMode { enabled: true, .. } => "enable_emergency_mode",
            Command::SetEmergencyMode { enabled: false, .. } => "disable_emergency_mode",
            Command::EmergencyUpgrade { .. } => "emergency_upgrade",
            Command::Rollback { .. } => "rollback_to_version",
            Command::TransferAdmin { .. } => "transfer_admin",
            Command::SetPaused { paused: true, .. } => "emergency_stop",
            Command::SetPaused { paused: false, .. } => "resume",
            Command::GrantRole { .. } => "grant_role",
            Command::RevokeRole { .. } => "revoke_role",
            Command::CommitCall { .. } => "call",
        }
    }
}
