//! Governance parameters fixed at genesis.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::voting::Threshold;

/// Default voting period: three days.
pub const DEFAULT_VOTING_PERIOD: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Default emergency mode duration: twenty-four hours.
pub const DEFAULT_EMERGENCY_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Default number of upgrade hops eligible for rollback.
pub const DEFAULT_ROLLBACK_WINDOW: u32 = 3;

/// Tunables for the voting, emergency and rollback paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceParams {
    /// How long a proposal accepts votes after creation.
    pub voting_period: Duration,
    /// Support required among cast votes for approval.
    pub threshold: Threshold,
    /// Minimum number of cast votes for a proposal to be approvable.
    pub quorum: u32,
    /// Number of most recent upgrade hops that may be reverted.
    pub rollback_window: u32,
    /// How long emergency mode stays active once enabled.
    pub emergency_duration: Duration,
}

impl Default for GovernanceParams {
    fn default() -> Self {
        Self {
            voting_period: DEFAULT_VOTING_PERIOD,
            threshold: Threshold::SimpleMajority,
            quorum: 0,
            rollback_window: DEFAULT_ROLLBACK_WINDOW,
            emergency_duration: DEFAULT_EMERGENCY_DURATION,
        }
    }
}

impl GovernanceParams {
    pub fn with_voting_period(mut self, period: Duration) -> Self {
        self.voting_period = period;
        self
    }

    pub fn with_threshold(mut self, threshold: Threshold) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_quorum(mut self, quorum: u32) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn with_rollback_window(mut self, window: u32) -> Self {
        self.rollback_window = window;
        self
    }

    pub fn with_emergency_duration(mut self, duration: Duration) -> Self {
        self.emergency_duration = duration;
        self
    }
}
