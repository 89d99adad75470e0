//! EmergencyController: a bounded-duration bypass of the vote.
//!
//! Emergency mode is never open-ended. Enabling it fixes an expiry time, and
//! the mode counts as inactive from that instant on whether or not anyone
//! disables it.

use std::time::Duration;

use helm_types::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyState {
    pub enabled_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
}

impl EmergencyState {
    /// Returns true while the mode is enabled and not yet expired.
    pub fn is_active(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expiry| now < expiry)
    }

    /// Returns true if the mode was enabled but its window has passed.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }

    /// Enables (or re-arms) the mode for `duration` starting at `now`.
    pub(crate) fn enabled(now: Timestamp, duration: Duration) -> Self {
        let expires_at = now.saturating_add(duration);

        // Postcondition: a zero duration would never activate
        debug_assert!(duration.is_zero() || expires_at > now);

        Self {
            enabled_at: Some(now),
            expires_at: Some(expires_at),
        }
    }

    pub(crate) fn disabled() -> Self {
        Self::default()
    }
}
