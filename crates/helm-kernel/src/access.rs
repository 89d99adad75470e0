//! Governance roles.
//!
//! The admin lives on [`crate::ProxyConfig`]; this table only tracks who may
//! propose and who may vote. The admin always has proposal rights without
//! an explicit grant.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use helm_types::Identity;
use serde::{Deserialize, Serialize};

/// A governance role that can be granted to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May create proposals, register migration plans and execute approved upgrades.
    Proposer,
    /// Eligible to vote on proposals.
    Voter,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Proposer => f.write_str("proposer"),
            Role::Voter => f.write_str("voter"),
        }
    }
}

/// Role assignments keyed by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roles {
    grants: BTreeMap<Identity, BTreeSet<Role>>,
}

impl Roles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `identity` holds `role`.
    pub fn has(&self, identity: &Identity, role: Role) -> bool {
        self.grants
            .get(identity)
            .is_some_and(|roles| roles.contains(&role))
    }

    /// Grants `role` to `identity`. Returns false if it was already held.
    pub fn grant(&mut self, identity: Identity, role: Role) -> bool {
        self.grants.entry(identity).or_default().insert(role)
    }

    /// Revokes `role` from `identity`. Returns false if it was not held.
    pub fn revoke(&mut self, identity: &Identity, role: Role) -> bool {
        let Some(roles) = self.grants.get_mut(identity) else {
            return false;
        };
        let removed = roles.remove(&role);
        if roles.is_empty() {
            self.grants.remove(identity);
        }
        removed
    }

    /// Iterates identities holding `role`, in identity order.
    pub fn holders(&self, role: Role) -> impl Iterator<Item = &Identity> {
        self.grants
            .iter()
            .filter(move |(_, roles)| roles.contains(&role))
            .map(|(identity, _)| identity)
    }

    /// Iterates every grant as `(identity, roles)` in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (&Identity, &BTreeSet<Role>)> {
        self.grants.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_and_revoke_report_changes() {
        let mut roles = Roles::new();
        let alice = Identity::new("alice");

        assert!(roles.grant(alice.clone(), Role::Voter));
        assert!(!roles.grant(alice.clone(), Role::Voter));
        assert!(roles.has(&alice, Role::Voter));
        assert!(!roles.has(&alice, Role::Proposer));

        assert!(roles.revoke(&alice, Role::Voter));
        assert!(!roles.revoke(&alice, Role::Voter));
        assert_eq!(roles.iter().count(), 0, "empty role sets are dropped");
    }

    #[test]
    fn holders_filters_by_role() {
        let mut roles = Roles::new();
        roles.grant(Identity::new("carol"), Role::Voter);
        roles.grant(Identity::new("alice"), Role::Voter);
        roles.grant(Identity::new("bob"), Role::Proposer);

        let voters: Vec<_> = roles.holders(Role::Voter).map(Identity::as_str).collect();
        assert_eq!(voters, vec!["alice", "carol"]);
    }
}
