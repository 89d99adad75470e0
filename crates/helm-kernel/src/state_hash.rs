//! Deterministic state hashing for kernel state.
//!
//! The hash is deterministic: same state → same hash. It lets tests and
//! hosts prove that a rejected command left the state bit-identical, and
//! that replaying the same command sequence reproduces the same state.
//!
//! # Algorithm
//!
//! BLAKE3 over every field in a fixed order. Variable-length fields are
//! length-prefixed and enums are tagged, so distinct states cannot collide
//! by concatenation. All maps are `BTreeMap`s, so iteration is sorted.

use blake3::Hasher;
use helm_types::{
    Identity, ImplementationRef, Timestamp, UpgradeOutcome, UpgradeSource, UpgradeStatus, Value,
    Version,
};

use crate::access::Role;
use crate::migration::{DataStore, MigrationStep, PlanKey};
use crate::state::State;
use crate::voting::Threshold;

impl State {
    /// Computes a deterministic hash of the entire kernel state.
    ///
    /// Fields are hashed in this order:
    /// 1. Governance parameters
    /// 2. Current version and version bindings
    /// 3. Proxy configuration
    /// 4. Proposals (sorted by id) and the next id
    /// 5. Migration plans (sorted by key)
    /// 6. Emergency window
    /// 7. Role grants (sorted by identity)
    /// 8. Audit log (in append order)
    /// 9. Persistent data
    ///
    /// # Examples
    ///
    /// ```
    /// use helm_kernel::{Genesis, GovernanceParams, State};
    /// use helm_types::Version;
    ///
    /// let genesis = Genesis::new(Version::new(1, 0, 0), "impl-1", "admin");
    /// let state1 = State::genesis(genesis.clone(), GovernanceParams::default());
    /// let state2 = State::genesis(genesis, GovernanceParams::default());
    ///
    /// assert_eq!(state1.compute_state_hash(), state2.compute_state_hash());
    /// ```
    pub fn compute_state_hash(&self) -> [u8; 32] {
        let mut hasher = Hasher::new();

        // Parameters
        let params = &self.params;
        hash_u128(&mut hasher, params.voting_period.as_nanos());
        match params.threshold {
            Threshold::SimpleMajority => {
                hasher.update(&[0u8]);
            }
            Threshold::Fraction {
                numerator,
                denominator,
            } => {
                hasher.update(&[1u8]);
                hasher.update(&numerator.to_le_bytes());
                hasher.update(&denominator.to_le_bytes());
            }
            Threshold::Count(n) => {
                hasher.update(&[2u8]);
                hasher.update(&n.to_le_bytes());
            }
        }
        hasher.update(&params.quorum.to_le_bytes());
        hasher.update(&params.rollback_window.to_le_bytes());
        hash_u128(&mut hasher, params.emergency_duration.as_nanos());

        // Versions
        hash_version(&mut hasher, self.versions.current());
        hash_len(&mut hasher, self.versions.bindings().len());
        for (version, implementation) in self.versions.bindings() {
            hash_version(&mut hasher, *version);
            hash_implementation(&mut hasher, implementation);
        }

        // Proxy
        hash_implementation(&mut hasher, &self.proxy.implementation);
        hash_identity(&mut hasher, &self.proxy.admin);
        hasher.update(&[u8::from(self.proxy.paused)]);
        hash_timestamp(&mut hasher, self.proxy.last_updated);
        hasher.update(&self.proxy.generation.to_le_bytes());

        // Proposals
        hasher.update(&u64::from(self.proposals.next_id()).to_le_bytes());
        hash_len(&mut hasher, self.proposals.len());
        for proposal in self.proposals.iter() {
            hasher.update(&u64::from(proposal.id).to_le_bytes());
            hash_identity(&mut hasher, &proposal.proposer);
            hash_version(&mut hasher, proposal.target_version);
            hash_implementation(&mut hasher, &proposal.implementation);
            hash_option_plan_key(&mut hasher, proposal.migration);
            hash_str(&mut hasher, &proposal.description);
            hasher.update(&[u8::from(proposal.major_upgrade)]);
            hasher.update(&[status_tag(proposal.status)]);
            hasher.update(&proposal.votes_for.to_le_bytes());
            hasher.update(&proposal.votes_against.to_le_bytes());
            hash_len(&mut hasher, proposal.voters.len());
            for voter in &proposal.voters {
                hash_identity(&mut hasher, voter);
            }
            hash_timestamp(&mut hasher, proposal.created_at);
            hash_timestamp(&mut hasher, proposal.voting_deadline);
        }

        // Plans
        hash_len(&mut hasher, self.plans.len());
        for (key, plan) in self.plans.iter() {
            hash_plan_key(&mut hasher, *key);
            hasher.update(&[u8::from(plan.reversible)]);
            hash_len(&mut hasher, plan.steps.len());
            for step in &plan.steps {
                hash_step(&mut hasher, step);
            }
        }

        // Emergency
        hash_option_timestamp(&mut hasher, self.emergency.enabled_at);
        hash_option_timestamp(&mut hasher, self.emergency.expires_at);

        // Roles
        let grants: Vec<_> = self.roles.iter().collect();
        hash_len(&mut hasher, grants.len());
        for (identity, roles) in grants {
            hash_identity(&mut hasher, identity);
            hash_len(&mut hasher, roles.len());
            for role in roles {
                hasher.update(&[match role {
                    Role::Proposer => 0u8,
                    Role::Voter => 1u8,
                }]);
            }
        }

        // Audit log
        hash_len(&mut hasher, self.audit.len());
        for tx in self.audit.iter() {
            hasher.update(&u64::from(tx.id).to_le_bytes());
            match tx.proposal_id {
                Some(id) => {
                    hasher.update(&[1u8]);
                    hasher.update(&u64::from(id).to_le_bytes());
                }
                None => {
                    hasher.update(&[0u8]);
                }
            }
            hasher.update(&[match tx.source {
                UpgradeSource::Governance => 0u8,
                UpgradeSource::Emergency => 1u8,
                UpgradeSource::Rollback => 2u8,
            }]);
            hash_version(&mut hasher, tx.from_version);
            hash_version(&mut hasher, tx.to_version);
            hash_implementation(&mut hasher, &tx.from_implementation);
            hash_implementation(&mut hasher, &tx.to_implementation);
            hash_identity(&mut hasher, &tx.executor);
            hash_timestamp(&mut hasher, tx.timestamp);
            match &tx.outcome {
                UpgradeOutcome::Success => {
                    hasher.update(&[0u8]);
                }
                UpgradeOutcome::Failed { reason } => {
                    hasher.update(&[1u8]);
                    hash_str(&mut hasher, reason);
                }
            }
            hash_option_plan_key(&mut hasher, tx.migration);
        }

        // Data
        hash_data(&mut hasher, &self.data);

        *hasher.finalize().as_bytes()
    }

    /// Hashes only the persistent data store.
    ///
    /// A failed migration records an audit entry and marks its proposal
    /// failed, so the full state hash moves; the data hash must not.
    pub fn compute_data_hash(&self) -> [u8; 32] {
        let mut hasher = Hasher::new();
        hash_data(&mut hasher, &self.data);
        *hasher.finalize().as_bytes()
    }
}

fn hash_len(hasher: &mut Hasher, len: usize) {
    hasher.update(&(len as u64).to_le_bytes());
}

fn hash_u128(hasher: &mut Hasher, value: u128) {
    hasher.update(&value.to_le_bytes());
}

fn hash_str(hasher: &mut Hasher, s: &str) {
    hash_len(hasher, s.len());
    hasher.update(s.as_bytes());
}

fn hash_identity(hasher: &mut Hasher, identity: &Identity) {
    hash_str(hasher, identity.as_str());
}

fn hash_implementation(hasher: &mut Hasher, implementation: &ImplementationRef) {
    hash_str(hasher, implementation.as_str());
}

fn hash_version(hasher: &mut Hasher, version: Version) {
    hasher.update(&version.major.to_le_bytes());
    hasher.update(&version.minor.to_le_bytes());
    hasher.update(&version.patch.to_le_bytes());
}

fn hash_timestamp(hasher: &mut Hasher, ts: Timestamp) {
    hasher.update(&ts.as_nanos().to_le_bytes());
}

fn hash_option_timestamp(hasher: &mut Hasher, ts: Option<Timestamp>) {
    match ts {
        Some(ts) => {
            hasher.update(&[1u8]);
            hash_timestamp(hasher, ts);
        }
        None => {
            hasher.update(&[0u8]);
        }
    }
}

fn hash_plan_key(hasher: &mut Hasher, key: PlanKey) {
    hash_version(hasher, key.from);
    hash_version(hasher, key.to);
}

fn hash_option_plan_key(hasher: &mut Hasher, key: Option<PlanKey>) {
    match key {
        Some(key) => {
            hasher.update(&[1u8]);
            hash_plan_key(hasher, key);
        }
        None => {
            hasher.update(&[0u8]);
        }
    }
}

fn status_tag(status: UpgradeStatus) -> u8 {
    match status {
        UpgradeStatus::Pending => 0,
        UpgradeStatus::Approved => 1,
        UpgradeStatus::Executed => 2,
        UpgradeStatus::Rejected => 3,
        UpgradeStatus::Cancelled => 4,
        UpgradeStatus::Failed => 5,
    }
}

fn hash_value(hasher: &mut Hasher, value: &Value) {
    match value {
        Value::Bool(b) => {
            hasher.update(&[0u8, u8::from(*b)]);
        }
        Value::Int(i) => {
            hasher.update(&[1u8]);
            hasher.update(&i.to_le_bytes());
        }
        Value::Text(s) => {
            hasher.update(&[2u8]);
            hash_str(hasher, s);
        }
        Value::Bytes(b) => {
            hasher.update(&[3u8]);
            hash_len(hasher, b.len());
            hasher.update(b);
        }
    }
}

fn hash_step(hasher: &mut Hasher, step: &MigrationStep) {
    match step {
        MigrationStep::Insert { key, value } => {
            hasher.update(&[0u8]);
            hash_str(hasher, key);
            hash_value(hasher, value);
        }
        MigrationStep::Delete { key, value } => {
            hasher.update(&[1u8]);
            hash_str(hasher, key);
            hash_value(hasher, value);
        }
        MigrationStep::Remove { key } => {
            hasher.update(&[2u8]);
            hash_str(hasher, key);
        }
        MigrationStep::Rename { from, to } => {
            hasher.update(&[3u8]);
            hash_str(hasher, from);
            hash_str(hasher, to);
        }
        MigrationStep::Rewrite { key, from, to } => {
            hasher.update(&[4u8]);
            hash_str(hasher, key);
            hash_value(hasher, from);
            hash_value(hasher, to);
        }
        MigrationStep::Increment { key, delta } => {
            hasher.update(&[5u8]);
            hash_str(hasher, key);
            hasher.update(&delta.to_le_bytes());
        }
    }
}

fn hash_data(hasher: &mut Hasher, data: &DataStore) {
    hash_len(hasher, data.len());
    for (key, value) in data.iter() {
        hash_str(hasher, key);
        hash_value(hasher, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Genesis;
    use crate::{Command, GovernanceParams, apply_committed};

    fn genesis_state() -> State {
        State::genesis(
            Genesis::new(Version::new(1, 0, 0), "impl-1.0.0", "admin")
                .with_data([("balance", 10i64)].into_iter().collect()),
            GovernanceParams::default(),
        )
    }

    #[test]
    fn test_genesis_hash_is_deterministic() {
        assert_eq!(
            genesis_state().compute_state_hash(),
            genesis_state().compute_state_hash()
        );
    }

    #[test]
    fn test_different_states_have_different_hashes() {
        let state = genesis_state();
        let (paused, _) = apply_committed(
            state.clone(),
            Timestamp::from_secs(1),
            Command::set_paused("admin", true),
        )
        .unwrap();

        assert_ne!(state.compute_state_hash(), paused.compute_state_hash());
        assert_eq!(state.compute_data_hash(), paused.compute_data_hash());
    }

    #[test]
    fn test_hash_survives_json_round_trip() {
        let state = genesis_state();
        let json = serde_json::to_string(&state).unwrap();
        let restored: State = serde_json::from_str(&json).unwrap();

        assert_eq!(state, restored);
        assert_eq!(state.compute_state_hash(), restored.compute_state_hash());
    }
}
