//! ProposalStore: upgrade proposals and their lifecycle.
//!
//! A proposal is created `Pending`, collects at most one vote per identity,
//! and is resolved to `Approved` or `Rejected`. Once a proposal reaches a
//! terminal status it is never modified again.

use std::collections::{BTreeMap, BTreeSet};

use helm_types::{Identity, ImplementationRef, ProposalId, Timestamp, UpgradeStatus, Version};
use serde::{Deserialize, Serialize};

use crate::kernel::KernelError;
use crate::migration::PlanKey;

/// A request to move the proxy to a new implementation and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeProposal {
    pub id: ProposalId,
    pub proposer: Identity,
    pub target_version: Version,
    pub implementation: ImplementationRef,
    /// Migration plan to run when the upgrade executes.
    pub migration: Option<PlanKey>,
    pub description: String,
    /// Set when the target leaves the current major series.
    pub major_upgrade: bool,
    pub status: UpgradeStatus,
    pub votes_for: u32,
    pub votes_against: u32,
    pub voters: BTreeSet<Identity>,
    pub created_at: Timestamp,
    pub voting_deadline: Timestamp,
}

impl UpgradeProposal {
    pub fn is_open(&self, now: Timestamp) -> bool {
        self.status == UpgradeStatus::Pending && now < self.voting_deadline
    }

    pub fn has_voted(&self, voter: &Identity) -> bool {
        self.voters.contains(voter)
    }

    /// Records one vote. Fails without changing tallies on a second vote.
    pub(crate) fn with_vote(
        mut self,
        voter: Identity,
        support: bool,
        now: Timestamp,
    ) -> Result<Self, KernelError> {
        if !self.is_open(now) {
            return Err(KernelError::VotingClosed(self.id));
        }
        if self.has_voted(&voter) {
            return Err(KernelError::AlreadyVoted {
                proposal_id: self.id,
                voter,
            });
        }

        let cast_before = self.votes_for + self.votes_against;

        if support {
            self.votes_for += 1;
        } else {
            self.votes_against += 1;
        }
        self.voters.insert(voter);

        // Postcondition: one voter per cast vote
        assert_eq!(
            (self.votes_for + self.votes_against) as usize,
            self.voters.len(),
            "tallies diverged from voter set on proposal {}",
            self.id
        );
        debug_assert_eq!(self.votes_for + self.votes_against, cast_before + 1);

        Ok(self)
    }

    /// Moves to `next`, enforcing the lifecycle.
    pub(crate) fn with_status(mut self, next: UpgradeStatus) -> Self {
        // Precondition: the lifecycle allows this move
        assert!(
            self.status.can_transition_to(next),
            "proposal {} cannot move from {} to {}",
            self.id,
            self.status,
            next
        );
        self.status = next;
        self
    }
}

/// Every proposal ever created, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalStore {
    proposals: BTreeMap<ProposalId, UpgradeProposal>,
    next_id: ProposalId,
}

impl ProposalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ProposalId) -> Option<&UpgradeProposal> {
        self.proposals.get(&id)
    }

    pub(crate) fn require(&self, id: ProposalId) -> Result<&UpgradeProposal, KernelError> {
        self.get(id).ok_or(KernelError::ProposalNotFound(id))
    }

    pub fn next_id(&self) -> ProposalId {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UpgradeProposal> {
        self.proposals.values()
    }

    /// Proposals that have not reached a terminal status, in id order.
    pub fn active(&self) -> impl Iterator<Item = &UpgradeProposal> {
        self.proposals.values().filter(|p| !p.status.is_terminal())
    }

    /// Allocates the next id. Ids are never reused.
    pub(crate) fn allocate_id(mut self) -> (Self, ProposalId) {
        let id = self.next_id;
        self.next_id = id.next();
        (self, id)
    }

    /// Replaces a stored proposal, or inserts a freshly allocated one.
    pub(crate) fn with_proposal(mut self, proposal: UpgradeProposal) -> Self {
        // Precondition: terminal proposals are frozen
        if let Some(existing) = self.proposals.get(&proposal.id) {
            assert!(
                !existing.status.is_terminal(),
                "proposal {} is {} and cannot be modified",
                existing.id,
                existing.status
            );
        }
        // Precondition: id was allocated by this store
        debug_assert!(proposal.id < self.next_id);

        self.proposals.insert(proposal.id, proposal);
        self
    }
}
