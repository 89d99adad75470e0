//! The governor: imperative shell around the kernel.
//!
//! Every public operation runs as one atomic unit:
//!
//! 1. Sample the clock once.
//! 2. Commit `ResolveExpired` so deadlines and emergency expiry are settled
//!    lazily, by whoever touches the system first.
//! 3. Apply the operation's command to a clone of the state. Only an `Ok`
//!    result replaces the live state.
//! 4. Execute the resulting effects (structured logs, optional broadcast).
//!
//! Forwarded calls are the only operations that run foreign code. They hold
//! the operation gate for their entire span and mark the calling thread, so
//! an implementation that tries to re-enter the governor is rejected with
//! [`HelmError::ReentrantCall`] instead of swapping the proxy under itself.

use std::fmt;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::thread::{self, ThreadId};

use bytes::Bytes;
use helm_config::HelmConfig;
use helm_kernel::{
    Command, DataStore, Effect, Genesis, GovernanceParams, KernelError, MigrationPlan, PlanKey,
    ProxyConfig, Role, State, UpgradeProposal, UpgradeTransaction, apply_committed,
};
use helm_types::{
    Identity, ImplementationRef, ProposalId, Timestamp, TransactionId, UpgradeStatus, Version,
};

#[cfg(feature = "broadcast")]
use crate::broadcast::{GovernanceBroadcast, GovernanceEvent};
use crate::clock::{Clock, SystemClock};
use crate::error::{HelmError, Result};
use crate::implementation::{Call, CallContext, Implementation, ImplementationTable};

/// Emergency mode as seen at the time of the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmergencyStatus {
    pub active: bool,
    pub expires_at: Option<Timestamp>,
}

/// Builder for [`Governor`].
pub struct GovernorBuilder {
    genesis: Genesis,
    params: GovernanceParams,
    clock: Option<Arc<dyn Clock>>,
    #[cfg(feature = "broadcast")]
    broadcast: Option<GovernanceBroadcast>,
}

impl GovernorBuilder {
    pub fn new(genesis: Genesis) -> Self {
        Self {
            genesis,
            params: GovernanceParams::default(),
            clock: None,
            #[cfg(feature = "broadcast")]
            broadcast: None,
        }
    }

    /// Governance parameters are fixed for the lifetime of the governor.
    pub fn params(mut self, params: GovernanceParams) -> Self {
        self.params = params;
        self
    }

    /// Replaces the wall clock, e.g. with a [`crate::ManualClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Publishes governance events on `broadcast`.
    #[cfg(feature = "broadcast")]
    pub fn broadcast(mut self, broadcast: GovernanceBroadcast) -> Self {
        self.broadcast = Some(broadcast);
        self
    }

    pub fn build(self) -> Governor {
        let state = State::genesis(self.genesis, self.params);

        tracing::info!(
            version = %state.current_version(),
            implementation = %state.proxy().implementation,
            admin = %state.admin(),
            "governor initialized"
        );

        Governor {
            shared: Arc::new(Shared {
                inner: RwLock::new(GovernorInner {
                    state,
                    implementations: ImplementationTable::new(),
                }),
                gate: Mutex::new(()),
                in_flight: Mutex::new(None),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
                #[cfg(feature = "broadcast")]
                broadcast: self.broadcast,
            }),
        }
    }
}

/// Governed, upgradeable proxy.
///
/// Cheap to clone; clones share the same state.
///
/// # Example
///
/// ```ignore
/// use helm::{Call, Genesis, Governor, GovernanceParams};
///
/// let genesis = Genesis::new("1.0.0".parse()?, "impl-1.0.0", "admin")
///     .with_voters(["alice", "bob", "carol"]);
/// let governor = Governor::new(genesis, GovernanceParams::default());
/// governor.deploy("impl-1.0.0", Arc::new(V1))?;
///
/// let reply = governor.call("alice", Call::method("balance"))?;
/// ```
#[derive(Clone)]
pub struct Governor {
    shared: Arc<Shared>,
}

struct Shared {
    inner: RwLock<GovernorInner>,
    /// Serializes every mutating operation, including the full span of a
    /// forwarded call.
    gate: Mutex<()>,
    /// Thread currently running a forwarded call.
    in_flight: Mutex<Option<ThreadId>>,
    clock: Arc<dyn Clock>,
    #[cfg(feature = "broadcast")]
    broadcast: Option<GovernanceBroadcast>,
}

struct GovernorInner {
    state: State,
    implementations: ImplementationTable,
}

impl Governor {
    /// Creates a governor on the wall clock.
    pub fn new(genesis: Genesis, params: GovernanceParams) -> Self {
        GovernorBuilder::new(genesis).params(params).build()
    }

    pub fn builder(genesis: Genesis) -> GovernorBuilder {
        GovernorBuilder::new(genesis)
    }

    /// Creates a governor with parameters taken from loaded configuration.
    pub fn from_config(genesis: Genesis, config: &HelmConfig) -> Result<Self> {
        Ok(Self::new(genesis, config.governance_params()?))
    }

    /// Subscribes to governance events, if a broadcaster was configured.
    #[cfg(feature = "broadcast")]
    pub fn subscribe(&self) -> Option<tokio::sync::broadcast::Receiver<GovernanceEvent>> {
        self.shared
            .broadcast
            .as_ref()
            .map(GovernanceBroadcast::subscribe)
    }

    // ========================================================================
    // Code deployment
    // ========================================================================

    /// Uploads code under `handle`.
    ///
    /// This does not change the live implementation; only an executed
    /// proposal, an emergency upgrade or a rollback can do that.
    pub fn deploy(
        &self,
        handle: impl Into<ImplementationRef>,
        code: Arc<dyn Implementation>,
    ) -> Result<()> {
        self.ensure_not_reentrant("deploy")?;
        let _gate = self.gate();

        let handle = handle.into();
        self.write()?
            .implementations
            .deploy(handle.clone(), code)?;

        tracing::info!(implementation = %handle, "implementation deployed");
        Ok(())
    }

    pub fn is_deployed(&self, handle: &ImplementationRef) -> Result<bool> {
        Ok(self.read()?.implementations.contains(handle))
    }

    /// Every deployed handle, whether or not the proxy points at it.
    pub fn deployed(&self) -> Result<Vec<ImplementationRef>> {
        Ok(self.read()?.implementations.handles().cloned().collect())
    }

    // ========================================================================
    // Versions
    // ========================================================================

    pub fn current_version(&self) -> Result<Version> {
        Ok(self.read()?.state.current_version())
    }

    /// True if `a` and `b` share a major version.
    pub fn is_compatible(&self, a: Version, b: Version) -> bool {
        helm_kernel::is_compatible(a, b)
    }

    // ========================================================================
    // Governance
    // ========================================================================

    /// Opens a proposal to move to `target` running `implementation`.
    ///
    /// `migration` names a registered plan from the current version to
    /// `target`; it must exist by the time the proposal is executed.
    pub fn propose_upgrade(
        &self,
        proposer: impl Into<Identity>,
        target: Version,
        implementation: impl Into<ImplementationRef>,
        migration: Option<PlanKey>,
        description: impl Into<String>,
    ) -> Result<ProposalId> {
        let command = Command::propose(proposer, target, implementation, migration, description);
        self.run(command, |_, effects| {
            effects
                .iter()
                .find_map(|effect| match effect {
                    Effect::ProposalCreated { proposal_id, .. } => Some(*proposal_id),
                    _ => None,
                })
                .ok_or_else(|| HelmError::internal("proposal committed without an id"))
        })
    }

    pub fn vote_on_proposal(
        &self,
        voter: impl Into<Identity>,
        proposal_id: ProposalId,
        support: bool,
    ) -> Result<()> {
        self.run(Command::vote(voter, proposal_id, support), |_, _| Ok(()))
    }

    /// Resolves a proposal if its outcome is already certain.
    ///
    /// Open to voters, proposers and the admin. Returns the proposal's
    /// status afterwards. Fails with `VotingOpen` while the outstanding
    /// voters could still change the result.
    pub fn tally(
        &self,
        caller: impl Into<Identity>,
        proposal_id: ProposalId,
    ) -> Result<UpgradeStatus> {
        self.run(Command::tally(caller, proposal_id), move |state, _| {
            state
                .proposal(proposal_id)
                .map(|proposal| proposal.status)
                .ok_or(HelmError::Kernel(KernelError::ProposalNotFound(proposal_id)))
        })
    }

    /// Executes an approved proposal: migrates data, moves the version and
    /// swaps the proxy in one step.
    ///
    /// A failed migration leaves data, version and proxy untouched, marks
    /// the proposal `Failed`, records the attempt in the audit log and
    /// returns `MigrationFailed`.
    pub fn execute_upgrade(
        &self,
        executor: impl Into<Identity>,
        proposal_id: ProposalId,
    ) -> Result<UpgradeTransaction> {
        self.run(Command::execute(executor, proposal_id), |_, effects| {
            committed_transaction(effects)
        })
    }

    pub fn cancel_proposal(
        &self,
        caller: impl Into<Identity>,
        proposal_id: ProposalId,
    ) -> Result<()> {
        self.run(Command::cancel(caller, proposal_id), |_, _| Ok(()))
    }

    pub fn register_migration_plan(
        &self,
        caller: impl Into<Identity>,
        plan: MigrationPlan,
    ) -> Result<PlanKey> {
        let key = plan.key();
        self.run(Command::register_plan(caller, plan), move |_, _| Ok(key))
    }

    // ========================================================================
    // Emergency and rollback
    // ========================================================================

    /// Enables (or re-arms) emergency mode for the configured duration.
    pub fn enable_emergency_mode(&self, admin: impl Into<Identity>) -> Result<EmergencyStatus> {
        self.run(Command::emergency_mode(admin, true), |state, _| {
            Ok(EmergencyStatus {
                active: true,
                expires_at: state.emergency().expires_at,
            })
        })
    }

    pub fn disable_emergency_mode(&self, admin: impl Into<Identity>) -> Result<()> {
        self.run(Command::emergency_mode(admin, false), |_, _| Ok(()))
    }

    /// Upgrades without a vote while emergency mode is active.
    pub fn emergency_upgrade(
        &self,
        admin: impl Into<Identity>,
        implementation: impl Into<ImplementationRef>,
        target: Version,
    ) -> Result<UpgradeTransaction> {
        self.run(
            Command::emergency_upgrade(admin, implementation, target),
            |_, effects| committed_transaction(effects),
        )
    }

    /// Reverts to an earlier version within the rollback window by applying
    /// the inverse of every migration since.
    pub fn rollback_to_version(
        &self,
        admin: impl Into<Identity>,
        target: Version,
    ) -> Result<UpgradeTransaction> {
        self.run(Command::rollback(admin, target), |_, effects| {
            committed_transaction(effects)
        })
    }

    // ========================================================================
    // Proxy administration
    // ========================================================================

    pub fn transfer_admin(
        &self,
        admin: impl Into<Identity>,
        new_admin: impl Into<Identity>,
    ) -> Result<()> {
        self.run(Command::transfer_admin(admin, new_admin), |_, _| Ok(()))
    }

    /// Pauses forwarded calls and governed execution.
    pub fn emergency_stop(&self, admin: impl Into<Identity>) -> Result<()> {
        self.run(Command::set_paused(admin, true), |_, _| Ok(()))
    }

    pub fn resume(&self, admin: impl Into<Identity>) -> Result<()> {
        self.run(Command::set_paused(admin, false), |_, _| Ok(()))
    }

    pub fn grant_role(
        &self,
        admin: impl Into<Identity>,
        identity: impl Into<Identity>,
        role: Role,
    ) -> Result<()> {
        self.run(Command::grant_role(admin, identity, role), |_, _| Ok(()))
    }

    pub fn revoke_role(
        &self,
        admin: impl Into<Identity>,
        identity: impl Into<Identity>,
        role: Role,
    ) -> Result<()> {
        self.run(Command::revoke_role(admin, identity, role), |_, _| Ok(()))
    }

    /// Settles expired proposals and emergency mode without doing anything else.
    pub fn resolve_expired(&self) -> Result<()> {
        self.run(Command::ResolveExpired, |_, _| Ok(()))
    }

    // ========================================================================
    // Forwarded calls
    // ========================================================================

    /// Forwards `call` to the live implementation on behalf of `caller`.
    ///
    /// The implementation works on a staged copy of the data store. Its
    /// writes are committed only if it returns `Ok`; otherwise nothing
    /// changes.
    pub fn call(&self, caller: impl Into<Identity>, call: Call) -> Result<Bytes> {
        let caller = caller.into();
        self.ensure_not_reentrant("call")?;
        let _gate = self.gate();
        let now = self.shared.clock.now();

        // Resolve the live implementation once, then release the lock while it runs
        let (code, handle, version, mut staged) = {
            let mut inner = self.write()?;
            self.settle(&mut inner, now)?;
            inner.state.proxy().ensure_running()?;

            let handle = inner.state.proxy().implementation.clone();
            let code = inner.implementations.resolve(&handle)?;
            (
                code,
                handle,
                inner.state.current_version(),
                inner.state.data().clone(),
            )
        };

        let output = {
            let _in_flight = InFlight::enter(&self.shared.in_flight)?;
            let ctx = CallContext {
                caller: &caller,
                implementation: &handle,
                version,
            };
            code.call(&ctx, &call, &mut staged)
                .map_err(|source| {
                    tracing::debug!(
                        caller = %caller,
                        implementation = %handle,
                        method = %call.method,
                        error = %source,
                        "forwarded call failed"
                    );
                    HelmError::Call {
                        implementation: handle.clone(),
                        method: call.method.clone(),
                        source,
                    }
                })?
        };

        let mut inner = self.write()?;
        self.commit(
            &mut inner,
            now,
            Command::CommitCall {
                caller,
                implementation: handle,
                data: staged,
            },
        )?;

        Ok(output)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn proposal(&self, proposal_id: ProposalId) -> Result<Option<UpgradeProposal>> {
        Ok(self.read()?.state.proposal(proposal_id).cloned())
    }

    /// Proposals that are still `Pending` or `Approved`, in id order.
    pub fn pending_proposals(&self) -> Result<Vec<UpgradeProposal>> {
        Ok(self.read()?.state.proposals().active().cloned().collect())
    }

    pub fn migration_plan(&self, key: &PlanKey) -> Result<Option<MigrationPlan>> {
        Ok(self.read()?.state.migration_plan(key).cloned())
    }

    pub fn audit_log(&self) -> Result<Vec<UpgradeTransaction>> {
        Ok(self.read()?.state.audit_log().iter().cloned().collect())
    }

    pub fn upgrade_transaction(&self, id: TransactionId) -> Result<Option<UpgradeTransaction>> {
        Ok(self.read()?.state.upgrade_transaction(id).cloned())
    }

    pub fn proxy_info(&self) -> Result<ProxyConfig> {
        Ok(self.read()?.state.proxy().clone())
    }

    pub fn emergency_status(&self) -> Result<EmergencyStatus> {
        let inner = self.read()?;
        let emergency = inner.state.emergency();
        Ok(EmergencyStatus {
            active: emergency.is_active(self.shared.clock.now()),
            expires_at: emergency.expires_at,
        })
    }

    pub fn data(&self) -> Result<DataStore> {
        Ok(self.read()?.state.data().clone())
    }

    /// BLAKE3 digest of the complete governance state.
    pub fn state_hash(&self) -> Result<[u8; 32]> {
        Ok(self.read()?.state.compute_state_hash())
    }

    /// A copy of the complete state, e.g. for persistence.
    pub fn snapshot(&self) -> Result<State> {
        Ok(self.read()?.state.clone())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Runs one command as an atomic operation and reads its result under
    /// the same lock.
    fn run<T>(
        &self,
        command: Command,
        read: impl FnOnce(&State, &[Effect]) -> Result<T>,
    ) -> Result<T> {
        self.ensure_not_reentrant(command.name())?;
        let _gate = self.gate();
        let now = self.shared.clock.now();

        let mut inner = self.write()?;
        self.settle(&mut inner, now)?;
        let effects = self.commit(&mut inner, now, command)?;
        read(&inner.state, &effects)
    }

    /// Commits lazy resolution of deadlines and emergency expiry.
    fn settle(&self, inner: &mut GovernorInner, now: Timestamp) -> Result<()> {
        let (state, effects) = apply_committed(inner.state.clone(), now, Command::ResolveExpired)?;
        inner.state = state;
        self.execute_effects(&effects);
        Ok(())
    }

    /// Applies `command` and replaces the state only if the kernel accepts it.
    fn commit(
        &self,
        inner: &mut GovernorInner,
        now: Timestamp,
        command: Command,
    ) -> Result<Vec<Effect>> {
        let action = command.name();
        let code_handle = required_implementation(&command).cloned();

        let (state, effects) = apply_committed(inner.state.clone(), now, command)
            .inspect_err(|e| tracing::debug!(action, error = %e, "command rejected"))?;

        // The proxy may only ever point at code that can serve calls
        if let Some(handle) = code_handle {
            if !inner.implementations.contains(&handle) {
                tracing::debug!(action, implementation = %handle, "command rejected");
                return Err(HelmError::UnknownImplementation(handle));
            }
        }

        inner.state = state;
        self.execute_effects(&effects);

        let aborted = effects.iter().find_map(|effect| match effect {
            Effect::MigrationAborted { error } => Some(error.clone()),
            _ => None,
        });
        if let Some(error) = aborted {
            return Err(KernelError::MigrationFailed(error).into());
        }

        Ok(effects)
    }

    /// Executes effects produced by the kernel.
    fn execute_effects(&self, effects: &[Effect]) {
        for effect in effects {
            tracing::debug!(kind = effect.kind(), ?effect, "effect");

            match effect {
                Effect::ProposalCreated {
                    proposal_id,
                    proposer,
                    target_version,
                    ..
                } => {
                    tracing::info!(proposal_id = %proposal_id, proposer = %proposer, target = %target_version, "proposal created");
                }
                Effect::ProposalResolved {
                    proposal_id,
                    status,
                } => {
                    tracing::info!(proposal_id = %proposal_id, status = %status, "proposal resolved");
                }
                Effect::ProposalCancelled {
                    proposal_id,
                    cancelled_by,
                } => {
                    tracing::info!(proposal_id = %proposal_id, by = %cancelled_by, "proposal cancelled");
                }
                Effect::MigrationApplied { key, steps } => {
                    tracing::info!(plan = %key, steps, "migration applied");
                }
                Effect::MigrationAborted { error } => {
                    tracing::warn!(plan = %error.key, step = error.step, error = %error, "migration aborted");
                }
                Effect::VersionChanged { from, to, source } => {
                    tracing::info!(from = %from, to = %to, source = %source, "version changed");
                }
                Effect::ImplementationSwapped {
                    from,
                    to,
                    generation,
                } => {
                    tracing::info!(from = %from, to = %to, generation, "implementation swapped");
                }
                Effect::EmergencyModeChanged {
                    enabled,
                    expires_at,
                } => {
                    if *enabled {
                        tracing::warn!(expires_at = ?expires_at, "emergency mode enabled");
                    } else {
                        tracing::info!("emergency mode disabled");
                    }
                }
                Effect::AdminTransferred { from, to } => {
                    tracing::info!(from = %from, to = %to, "admin transferred");
                }
                Effect::PauseChanged { paused } => {
                    if *paused {
                        tracing::warn!("proxy paused");
                    } else {
                        tracing::info!("proxy resumed");
                    }
                }
                Effect::VoteRecorded { .. }
                | Effect::PlanRegistered { .. }
                | Effect::AuditLogAppend(_)
                | Effect::RoleChanged { .. }
                | Effect::DataCommitted { .. } => {}
            }

            #[cfg(feature = "broadcast")]
            if let Some(broadcast) = &self.shared.broadcast {
                if let Some(event) = GovernanceEvent::from_effect(effect) {
                    broadcast.send(event);
                }
            }
        }
    }

    fn ensure_not_reentrant(&self, action: &'static str) -> Result<()> {
        let in_flight = self
            .shared
            .in_flight
            .lock()
            .map_err(|_| HelmError::internal("lock poisoned"))?;

        if *in_flight == Some(thread::current().id()) {
            tracing::warn!(action, "reentrant call rejected");
            return Err(HelmError::ReentrantCall { action });
        }
        Ok(())
    }

    /// The gate guards no data, so a panic in a forwarded call cannot leave
    /// it inconsistent.
    fn gate(&self) -> MutexGuard<'_, ()> {
        self.shared
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, GovernorInner>> {
        self.shared
            .inner
            .read()
            .map_err(|_| HelmError::internal("lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, GovernorInner>> {
        self.shared
            .inner
            .write()
            .map_err(|_| HelmError::internal("lock poisoned"))
    }
}

impl fmt::Debug for Governor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Governor").finish_non_exhaustive()
    }
}

/// Marks the current thread as running a forwarded call until dropped.
struct InFlight<'a> {
    slot: &'a Mutex<Option<ThreadId>>,
}

impl<'a> InFlight<'a> {
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Result<Self> {
        *slot
            .lock()
            .map_err(|_| HelmError::internal("lock poisoned"))? = Some(thread::current().id());
        Ok(Self { slot })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }
}

/// Handle a command would point the proxy at, directly or via a proposal.
fn required_implementation(command: &Command) -> Option<&ImplementationRef> {
    match command {
        Command::ProposeUpgrade { implementation, .. }
        | Command::EmergencyUpgrade { implementation, .. } => Some(implementation),
        _ => None,
    }
}

fn committed_transaction(effects: &[Effect]) -> Result<UpgradeTransaction> {
    effects
        .iter()
        .rev()
        .find_map(|effect| match effect {
            Effect::AuditLogAppend(tx) => Some(tx.clone()),
            _ => None,
        })
        .ok_or_else(|| HelmError::internal("upgrade committed without an audit entry"))
}
