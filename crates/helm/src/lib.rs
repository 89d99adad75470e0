//! # Helm
//!
//! Governed upgrades for long-lived, versioned systems.
//!
//! A Helm deployment is a proxy in front of swappable implementations.
//! Callers always talk to the proxy; the proxy forwards every call to the
//! implementation it currently points at. Moving that pointer is the only
//! way to upgrade, and it can only happen through audited paths:
//!
//! - **Governance** - propose, vote, execute, with data migrated atomically
//! - **Emergency** - a bounded, admin-only bypass for urgent fixes
//! - **Rollback** - a forward-moving revert through inverse migrations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Governor                           │
//! │  ┌──────────┐   ┌────────────┐   ┌─────────┐   ┌──────────┐  │
//! │  │ Command  │ → │   Kernel   │ → │ Effects │ → │ Tracing/ │  │
//! │  │          │   │ (pure FSM) │   │         │   │ Broadcast│  │
//! │  └──────────┘   └────────────┘   └─────────┘   └──────────┘  │
//! │        call() → ImplementationTable → staged DataStore       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use helm::{Genesis, Governor, GovernanceParams};
//!
//! let genesis = Genesis::new("1.2.0".parse()?, "impl-1.2.0", "admin")
//!     .with_voters(["alice", "bob", "carol"]);
//! let governor = Governor::new(genesis, GovernanceParams::default());
//! governor.deploy("impl-2.0.0", Arc::new(V2))?;
//!
//! let id = governor.propose_upgrade("admin", "2.0.0".parse()?, "impl-2.0.0", None, "v2")?;
//! governor.vote_on_proposal("alice", id, true)?;
//! governor.vote_on_proposal("bob", id, true)?;
//! governor.vote_on_proposal("carol", id, false)?;
//! governor.tally("admin", id)?;
//! governor.execute_upgrade("admin", id)?;
//! ```

#[cfg(feature = "broadcast")]
pub mod broadcast;
mod clock;
mod error;
mod governor;
mod implementation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{HelmError, Result};
pub use governor::{EmergencyStatus, Governor, GovernorBuilder};
pub use implementation::{Call, CallContext, CallError, Implementation, ImplementationTable};

// Re-export the kernel vocabulary so callers need a single dependency
pub use helm_kernel::{
    DataStore, Genesis, GovernanceParams, KernelError, MigrationError, MigrationPlan,
    MigrationStep, PlanKey, ProxyConfig, Role, State, StepError, Threshold, UpgradeProposal,
    UpgradeTransaction,
};
pub use helm_types::{
    Identity, ImplementationRef, ProposalId, Timestamp, TransactionId, UpgradeOutcome,
    UpgradeSource, UpgradeStatus, Value, Version,
};
