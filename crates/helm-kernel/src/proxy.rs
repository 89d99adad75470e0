//! ProxyConfig: the single live implementation pointer.

use helm_types::{Identity, ImplementationRef, Timestamp};
use serde::{Deserialize, Serialize};

use crate::kernel::KernelError;

/// The proxy record every forwarded call is resolved against.
///
/// There is exactly one of these in [`crate::State`]. Only the upgrade,
/// emergency and rollback paths in the kernel swap `implementation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub implementation: ImplementationRef,
    pub admin: Identity,
    pub paused: bool,
    /// When the implementation was last swapped.
    pub last_updated: Timestamp,
    /// Bumped on every implementation swap.
    pub generation: u64,
}

impl ProxyConfig {
    pub fn new(implementation: ImplementationRef, admin: Identity) -> Self {
        Self {
            implementation,
            admin,
            paused: false,
            last_updated: Timestamp::EPOCH,
            generation: 0,
        }
    }

    pub fn is_admin(&self, identity: &Identity) -> bool {
        &self.admin == identity
    }

    /// Fails with `Unauthorized` unless `identity` is the admin.
    pub fn ensure_admin(
        &self,
        identity: &Identity,
        action: &'static str,
    ) -> Result<(), KernelError> {
        if self.is_admin(identity) {
            Ok(())
        } else {
            Err(KernelError::Unauthorized {
                identity: identity.clone(),
                action,
            })
        }
    }

    /// Fails with `ProxyPaused` while the proxy is stopped.
    pub fn ensure_running(&self) -> Result<(), KernelError> {
        if self.paused {
            Err(KernelError::ProxyPaused)
        } else {
            Ok(())
        }
    }

    /// Swaps the implementation pointer. This is the low-level upgrade
    /// primitive; it is not reachable from any command directly.
    pub(crate) fn with_implementation(
        mut self,
        implementation: ImplementationRef,
        now: Timestamp,
    ) -> Self {
        let generation = self.generation;
        self.implementation = implementation;
        self.last_updated = now;
        self.generation = generation + 1;

        // Postcondition: generation strictly increases
        debug_assert!(self.generation > generation);
        self
    }

    pub(crate) fn with_admin(mut self, admin: Identity) -> Self {
        self.admin = admin;
        self
    }

    pub(crate) fn with_paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }
}
