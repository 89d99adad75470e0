//! Governance event broadcasting for live dashboards and operators.

use helm_kernel::Effect;
use helm_types::{
    Identity, ImplementationRef, ProposalId, Timestamp, TransactionId, UpgradeOutcome,
    UpgradeSource, UpgradeStatus, Version,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted when governance state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GovernanceEvent {
    /// A new proposal opened for voting.
    ProposalCreated {
        proposal_id: ProposalId,
        proposer: Identity,
        target_version: Version,
        voting_deadline: Timestamp,
    },
    /// A vote was counted.
    VoteRecorded {
        proposal_id: ProposalId,
        votes_for: u32,
        votes_against: u32,
    },
    /// A proposal changed status (including cancellation).
    ProposalResolved {
        proposal_id: ProposalId,
        status: UpgradeStatus,
    },
    /// The live version moved.
    UpgradeCommitted {
        transaction_id: TransactionId,
        source: UpgradeSource,
        from_version: Version,
        to_version: Version,
        implementation: ImplementationRef,
    },
    /// An upgrade attempt aborted; nothing changed.
    UpgradeFailed {
        transaction_id: TransactionId,
        source: UpgradeSource,
        to_version: Version,
        reason: String,
    },
    EmergencyModeChanged {
        enabled: bool,
        expires_at: Option<Timestamp>,
    },
    PauseChanged { paused: bool },
    AdminTransferred { from: Identity, to: Identity },
}

impl GovernanceEvent {
    /// Picks out the effects operators care about.
    ///
    /// Effects that only describe internal bookkeeping (plan registration,
    /// role changes, committed call data) are not published.
    pub fn from_effect(effect: &Effect) -> Option<Self> {
        let event = match effect {
            Effect::ProposalCreated {
                proposal_id,
                proposer,
                target_version,
                voting_deadline,
                ..
            } => Self::ProposalCreated {
                proposal_id: *proposal_id,
                proposer: proposer.clone(),
                target_version: *target_version,
                voting_deadline: *voting_deadline,
            },
            Effect::VoteRecorded {
                proposal_id,
                votes_for,
                votes_against,
                ..
            } => Self::VoteRecorded {
                proposal_id: *proposal_id,
                votes_for: *votes_for,
                votes_against: *votes_against,
            },
            Effect::ProposalResolved {
                proposal_id,
                status,
            } => Self::ProposalResolved {
                proposal_id: *proposal_id,
                status: *status,
            },
            Effect::ProposalCancelled { proposal_id, .. } => Self::ProposalResolved {
                proposal_id: *proposal_id,
                status: UpgradeStatus::Cancelled,
            },
            Effect::AuditLogAppend(tx) => match &tx.outcome {
                UpgradeOutcome::Success => Self::UpgradeCommitted {
                    transaction_id: tx.id,
                    source: tx.source,
                    from_version: tx.from_version,
                    to_version: tx.to_version,
                    implementation: tx.to_implementation.clone(),
                },
                UpgradeOutcome::Failed { reason } => Self::UpgradeFailed {
                    transaction_id: tx.id,
                    source: tx.source,
                    to_version: tx.to_version,
                    reason: reason.clone(),
                },
            },
            Effect::EmergencyModeChanged {
                enabled,
                expires_at,
            } => Self::EmergencyModeChanged {
                enabled: *enabled,
                expires_at: *expires_at,
            },
            Effect::PauseChanged { paused } => Self::PauseChanged { paused: *paused },
            Effect::AdminTransferred { from, to } => Self::AdminTransferred {
                from: from.clone(),
                to: to.clone(),
            },
            _ => return None,
        };
        Some(event)
    }
}

/// Broadcasts governance events to connected subscribers.
#[derive(Debug, Clone)]
pub struct GovernanceBroadcast {
    tx: broadcast::Sender<GovernanceEvent>,
}

impl GovernanceBroadcast {
    /// Creates a new broadcaster with the given buffer size.
    ///
    /// # Arguments
    /// * `buffer_size` - Number of events to buffer for slow consumers (default: 1024)
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _rx) = broadcast::channel(buffer_size);
        Self { tx }
    }

    /// Sends an event to all subscribers.
    ///
    /// Returns the number of active subscribers who received the event.
    /// Slow subscribers who fall behind will receive a `RecvError::Lagged` error.
    pub fn send(&self, event: GovernanceEvent) -> usize {
        self.tx.send(event).unwrap_or_default()
    }

    /// Subscribes to governance events.
    ///
    /// Events sent before subscription are not included.
    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for GovernanceBroadcast {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_send_receive() {
        let broadcast = GovernanceBroadcast::new(16);
        let mut rx = broadcast.subscribe();

        let event = GovernanceEvent::PauseChanged { paused: true };
        assert_eq!(broadcast.send(event.clone()), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[test]
    fn test_send_without_subscribers() {
        let broadcast = GovernanceBroadcast::default();
        assert_eq!(broadcast.receiver_count(), 0);
        assert_eq!(
            broadcast.send(GovernanceEvent::PauseChanged { paused: false }),
            0
        );
    }

    #[test]
    fn test_bookkeeping_effects_are_not_published() {
        let effect = Effect::PauseChanged { paused: true };
        assert!(GovernanceEvent::from_effect(&effect).is_some());

        let effect = Effect::RoleChanged {
            identity: Identity::new("alice"),
            role: helm_kernel::Role::Voter,
            granted: true,
        };
        assert!(GovernanceEvent::from_effect(&effect).is_none());
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = GovernanceEvent::PauseChanged { paused: true };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"pauseChanged","paused":true}"#);
    }
}
