//! Append-only upgrade transaction log.
//!
//! Every version change (governed, emergency, rollback) and every aborted
//! migration lands here. Entries are never edited or removed, and their
//! timestamps never decrease.

use helm_types::{
    Identity, ImplementationRef, ProposalId, Timestamp, TransactionId, UpgradeOutcome,
    UpgradeSource, Version,
};
use serde::{Deserialize, Serialize};

use crate::migration::PlanKey;

/// One audited upgrade attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeTransaction {
    pub id: TransactionId,
    /// Set for governance upgrades; emergency upgrades and rollbacks have none.
    pub proposal_id: Option<ProposalId>,
    pub source: UpgradeSource,
    pub from_version: Version,
    pub to_version: Version,
    pub from_implementation: ImplementationRef,
    pub to_implementation: ImplementationRef,
    pub executor: Identity,
    pub timestamp: Timestamp,
    pub outcome: UpgradeOutcome,
    /// Registered plan applied for this hop. Rollbacks apply derived inverse
    /// plans and leave this empty.
    pub migration: Option<PlanKey>,
}

impl UpgradeTransaction {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Everything in an [`UpgradeTransaction`] except its id and final timestamp.
#[derive(Debug, Clone)]
pub(crate) struct PendingTransaction {
    pub proposal_id: Option<ProposalId>,
    pub source: UpgradeSource,
    pub from_version: Version,
    pub to_version: Version,
    pub from_implementation: ImplementationRef,
    pub to_implementation: ImplementationRef,
    pub executor: Identity,
    pub outcome: UpgradeOutcome,
    pub migration: Option<PlanKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLog {
    entries: Vec<UpgradeTransaction>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: TransactionId) -> Option<&UpgradeTransaction> {
        self.entries.get(id.as_usize())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&UpgradeTransaction> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &UpgradeTransaction> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[UpgradeTransaction] {
        &self.entries
    }

    /// Appends an entry and returns a copy of what was stored.
    ///
    /// The timestamp is clamped to the previous entry's so the log stays
    /// totally ordered even if the shell's clock steps backwards.
    pub(crate) fn append(
        mut self,
        pending: PendingTransaction,
        now: Timestamp,
    ) -> (Self, UpgradeTransaction) {
        let len_before = self.entries.len();
        let timestamp = self
            .entries
            .last()
            .map_or(now, |last| now.max(last.timestamp));

        let tx = UpgradeTransaction {
            id: TransactionId::new(len_before as u64),
            proposal_id: pending.proposal_id,
            source: pending.source,
            from_version: pending.from_version,
            to_version: pending.to_version,
            from_implementation: pending.from_implementation,
            to_implementation: pending.to_implementation,
            executor: pending.executor,
            timestamp,
            outcome: pending.outcome,
            migration: pending.migration,
        };
        self.entries.push(tx.clone());

        // Postcondition: exactly one entry appended, ids stay dense
        assert_eq!(self.entries.len(), len_before + 1);
        debug_assert_eq!(tx.id.as_usize(), len_before);

        (self, tx)
    }
}
