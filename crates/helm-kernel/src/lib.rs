//! # helm-kernel: Functional core of `Helm`
//!
//! The kernel is the pure, deterministic heart of the upgrade-governance
//! system. It receives committed commands and produces state changes plus
//! effects for the shell to execute.
//!
//! ## Key Principles
//!
//! - **No IO**: The kernel never touches disk, network, or any external resource
//! - **No clocks**: Timestamps are supplied by the shell with each command
//! - **No randomness**: Same input always produces same output
//! - **Pure functions**: `apply_committed(state, now, command) -> (state, effects)`
//! - **Atomic**: A command either produces a complete new state or an error;
//!   callers keep the previous state on error
//!
//! ## Architecture
//!
//! - [`version`]: VersionRegistry, compatibility rules
//! - [`migration`]: MigrationExecutor, plans, the persistent data store
//! - [`proposal`]: ProposalStore and the proposal lifecycle
//! - [`voting`]: VotingEngine thresholds and resolution
//! - [`emergency`]: EmergencyController with bounded expiry
//! - [`rollback`]: RollbackManager window and inverse path
//! - [`proxy`]: ProxyConfig, the single live implementation pointer
//! - [`audit`]: Append-only upgrade transaction log
//! - [`kernel`]: The `apply_committed` function that ties it all together
//!
//! ## Example
//!
//! ```ignore
//! use helm_kernel::{Command, Genesis, GovernanceParams, State, apply_committed};
//!
//! let state = State::genesis(genesis, GovernanceParams::default());
//! let cmd = Command::propose(...);
//!
//! match apply_committed(state.clone(), now, cmd) {
//!     Ok((new_state, effects)) => {
//!         // Commit new_state, execute effects via the shell...
//!     }
//!     Err(e) => {
//!         // `state` is untouched; report e to the caller
//!     }
//! }
//! ```

pub mod access;
pub mod audit;
pub mod command;
pub mod effects;
pub mod emergency;
pub mod kernel;
pub mod migration;
pub mod params;
pub mod proposal;
pub mod proxy;
pub mod rollback;
pub mod state;
pub mod state_hash;
pub mod version;
pub mod voting;


// Re-export commonly used items
pub use access::{Role, Roles};
pub use audit::{AuditLog, UpgradeTransaction};
pub use command::Command;
pub use effects::Effect;
pub use emergency::EmergencyState;
pub use kernel::{KernelError, apply_committed};
pub use migration::{DataStore, MigrationError, MigrationPlan, MigrationStep, PlanKey, StepError};
pub use params::GovernanceParams;
pub use proposal::UpgradeProposal;
pub use proxy::ProxyConfig;
pub use state::{Genesis, State};
pub use version::{VersionRegistry, is_compatible, is_forward_compatible};
pub use voting::Threshold;
