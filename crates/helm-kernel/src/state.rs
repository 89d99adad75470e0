//! Kernel state management.
//!
//! The kernel holds exactly one logical state record: the version registry,
//! the proxy configuration, all proposals and plans, the emergency flag, the
//! role table, the audit log and the implementation's persistent data.
//! Transitions take ownership and return a new state.

use helm_types::{Identity, ImplementationRef, ProposalId, Timestamp, TransactionId, Version};
use serde::{Deserialize, Serialize};

use crate::access::{Role, Roles};
use crate::audit::{AuditLog, UpgradeTransaction};
use crate::emergency::EmergencyState;
use crate::migration::{DataStore, MigrationPlan, MigrationRegistry, PlanKey};
use crate::params::GovernanceParams;
use crate::proposal::{ProposalStore, UpgradeProposal};
use crate::proxy::ProxyConfig;
use crate::version::VersionRegistry;

// ============================================================================
// Genesis
// ============================================================================

/// Initial deployment: the first version, its implementation, the admin,
/// and any pre-existing data and role grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    pub version: Version,
    pub implementation: ImplementationRef,
    pub admin: Identity,
    pub data: DataStore,
    pub roles: Roles,
}

impl Genesis {
    pub fn new(
        version: Version,
        implementation: impl Into<ImplementationRef>,
        admin: impl Into<Identity>,
    ) -> Self {
        Self {
            version,
            implementation: implementation.into(),
            admin: admin.into(),
            data: DataStore::new(),
            roles: Roles::new(),
        }
    }

    pub fn with_data(mut self, data: DataStore) -> Self {
        self.data = data;
        self
    }

    pub fn with_role(mut self, identity: impl Into<Identity>, role: Role) -> Self {
        self.roles.grant(identity.into(), role);
        self
    }

    /// Grants `Role::Voter` to every identity given.
    pub fn with_voters<I, S>(mut self, voters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Identity>,
    {
        for voter in voters {
            self.roles.grant(voter.into(), Role::Voter);
        }
        self
    }
}

// ============================================================================
// Kernel State
// ============================================================================

/// The kernel's state.
///
/// Sub-records use a consuming builder style: the kernel moves each piece
/// out, transforms it, and moves it back. Nothing here is visible to the
/// shell except through read accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub(crate) params: GovernanceParams,
    pub(crate) versions: VersionRegistry,
    pub(crate) proxy: ProxyConfig,
    pub(crate) proposals: ProposalStore,
    pub(crate) plans: MigrationRegistry,
    pub(crate) emergency: EmergencyState,
    pub(crate) roles: Roles,
    pub(crate) audit: AuditLog,
    pub(crate) data: DataStore,
}

impl State {
    /// Creates the initial state for a deployment.
    pub fn genesis(genesis: Genesis, params: GovernanceParams) -> Self {
        let state = Self {
            params,
            versions: VersionRegistry::new(genesis.version, genesis.implementation.clone()),
            proxy: ProxyConfig::new(genesis.implementation, genesis.admin),
            proposals: ProposalStore::new(),
            plans: MigrationRegistry::new(),
            emergency: EmergencyState::default(),
            roles: genesis.roles,
            audit: AuditLog::new(),
            data: genesis.data,
        };

        // Postcondition: proxy and registry agree on the live implementation
        debug_assert_eq!(
            state.versions.binding(&state.versions.current()),
            Some(&state.proxy.implementation)
        );

        state
    }

    pub fn params(&self) -> &GovernanceParams {
        &self.params
    }

    pub fn current_version(&self) -> Version {
        self.versions.current()
    }

    pub fn versions(&self) -> &VersionRegistry {
        &self.versions
    }

    pub fn proxy(&self) -> &ProxyConfig {
        &self.proxy
    }

    pub fn admin(&self) -> &Identity {
        &self.proxy.admin
    }

    pub fn proposal(&self, id: ProposalId) -> Option<&UpgradeProposal> {
        self.proposals.get(id)
    }

    pub fn proposals(&self) -> &ProposalStore {
        &self.proposals
    }

    pub fn migration_plan(&self, key: &PlanKey) -> Option<&MigrationPlan> {
        self.plans.get(key)
    }

    pub fn plans(&self) -> &MigrationRegistry {
        &self.plans
    }

    pub fn emergency(&self) -> &EmergencyState {
        &self.emergency
    }

    pub fn is_emergency_active(&self, now: Timestamp) -> bool {
        self.emergency.is_active(now)
    }

    pub fn roles(&self) -> &Roles {
        &self.roles
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn upgrade_transaction(&self, id: TransactionId) -> Option<&UpgradeTransaction> {
        self.audit.get(id)
    }

    pub fn data(&self) -> &DataStore {
        &self.data
    }

    /// Admin or an explicit `Proposer` grant.
    pub fn can_propose(&self, identity: &Identity) -> bool {
        self.proxy.is_admin(identity) || self.roles.has(identity, Role::Proposer)
    }

    pub fn can_vote(&self, identity: &Identity) -> bool {
        self.roles.has(identity, Role::Voter)
    }

    /// Eligible voters who have not voted on `proposal` yet.
    pub(crate) fn outstanding_voters(&self, proposal: &UpgradeProposal) -> u32 {
        let outstanding = self
            .roles
            .holders(Role::Voter)
            .filter(|voter| !proposal.has_voted(voter))
            .count();
        u32::try_from(outstanding).unwrap_or(u32::MAX)
    }
}
