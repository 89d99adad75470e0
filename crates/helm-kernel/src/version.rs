//! VersionRegistry: the single "current version" record and its rules.
//!
//! Compatibility is a property of the major series. Within a series every
//! minor and patch combination is compatible; crossing a major boundary is
//! only possible through a governance proposal that carries the explicit
//! major-upgrade flag.

use std::collections::BTreeMap;

use helm_types::{ImplementationRef, Version};
use serde::{Deserialize, Serialize};

use crate::kernel::KernelError;

/// Returns true when `a` and `b` belong to the same major series.
///
/// Symmetric: minor and patch never affect the answer.
pub fn is_compatible(a: Version, b: Version) -> bool {
    a.same_major(&b)
}

/// Directional form used on upgrade paths: `b` must be in the same major
/// series and must not go back in minor version.
pub fn is_forward_compatible(a: Version, b: Version) -> bool {
    is_compatible(a, b) && b.minor >= a.minor
}

/// Authority under which the current version is being replaced.
///
/// Only the execution paths inside the kernel construct this; there is no
/// command that sets the version directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VersionChange {
    /// A voted proposal. `major_upgrade` is the explicit flag recorded on the
    /// proposal when it was created.
    Governed { major_upgrade: bool },
    /// Admin bypass while emergency mode is active.
    Emergency,
    /// Reversion to an earlier version in the same series.
    Rollback,
}

/// Tracks the active version and which implementation each version is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRegistry {
    current: Version,
    /// Version -> implementation handle. A binding never changes once made.
    bindings: BTreeMap<Version, ImplementationRef>,
}

impl VersionRegistry {
    pub fn new(genesis: Version, implementation: ImplementationRef) -> Self {
        let mut bindings = BTreeMap::new();
        bindings.insert(genesis, implementation);
        Self {
            current: genesis,
            bindings,
        }
    }

    /// Returns the active version.
    pub fn current(&self) -> Version {
        self.current
    }

    /// Returns the implementation a version was bound to, if any.
    pub fn binding(&self, version: &Version) -> Option<&ImplementationRef> {
        self.bindings.get(version)
    }

    /// Returns all version bindings in ascending version order.
    pub fn bindings(&self) -> &BTreeMap<Version, ImplementationRef> {
        &self.bindings
    }

    /// Validates a forward upgrade target against the current version.
    ///
    /// The target must be strictly newer, and must not already be bound to a
    /// different implementation.
    pub fn check_upgrade_target(
        &self,
        target: Version,
        implementation: &ImplementationRef,
    ) -> Result<(), KernelError> {
        if target <= self.current {
            return Err(KernelError::InvalidVersion {
                target,
                reason: format!("target must be newer than current version {}", self.current),
            });
        }

        if let Some(bound) = self.bindings.get(&target) {
            if bound != implementation {
                return Err(KernelError::InvalidVersion {
                    target,
                    reason: format!("version is already bound to implementation '{bound}'"),
                });
            }
        }

        Ok(())
    }

    /// Replaces the current version.
    ///
    /// Fails with `IncompatibleVersion` if the major series changes without
    /// the governed major-upgrade flag.
    pub(crate) fn set_current(
        mut self,
        version: Version,
        implementation: &ImplementationRef,
        change: VersionChange,
    ) -> Result<Self, KernelError> {
        let compatible = is_compatible(self.current, version);
        let allowed = match change {
            VersionChange::Governed { major_upgrade } => compatible || major_upgrade,
            VersionChange::Emergency | VersionChange::Rollback => compatible,
        };

        if !allowed {
            return Err(KernelError::IncompatibleVersion {
                current: self.current,
                target: version,
            });
        }

        self.bindings
            .entry(version)
            .or_insert_with(|| implementation.clone());

        // Invariant: a version never changes the implementation it is bound to
        assert_eq!(
            self.bindings.get(&version),
            Some(implementation),
            "version {version} rebound to a different implementation"
        );

        self.current = version;
        Ok(self)
    }
}
