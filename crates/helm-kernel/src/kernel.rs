//! The kernel - pure functional core of `Helm`.
//!
//! The kernel applies committed commands to produce new state and effects.
//! It is completely pure: no IO, no clocks, no randomness. The current time
//! arrives as an argument, so deadlines and emergency expiry are decided
//! deterministically.
//!
//! # Example
//!
//! ```ignore
//! let state = State::genesis(genesis, GovernanceParams::default());
//! let cmd = Command::vote("alice", proposal_id, true);
//!
//! let (new_state, effects) = apply_committed(state, now, cmd)?;
//! // Shell executes effects...
//! ```

use helm_types::{
    Identity, ImplementationRef, ProposalId, Timestamp, UpgradeOutcome, UpgradeSource,
    UpgradeStatus, Version,
};

use crate::access::Role;
use crate::audit::PendingTransaction;
use crate::command::Command;
use crate::effects::Effect;
use crate::emergency::EmergencyState;
use crate::migration::{self, MigrationError, MigrationPlan, PlanKey};
use crate::proposal::UpgradeProposal;
use crate::rollback::plan_rollback;
use crate::state::State;
use crate::version::{VersionChange, is_compatible};
use crate::voting::{Decision, decide};

/// Applies a committed command to the state, producing new state and effects.
///
/// Takes ownership of state and returns the new state. On `Err` the caller
/// must keep its previous state: nothing from a failed command survives.
///
/// A migration that fails during `ExecuteUpgrade`, `EmergencyUpgrade` or
/// `Rollback` is not an `Err`: the data and version stay as they were, the
/// attempt is recorded in the audit log, and `Effect::MigrationAborted`
/// reports the failure.
#[allow(clippy::too_many_lines)]
pub fn apply_committed(
    state: State,
    now: Timestamp,
    cmd: Command,
) -> Result<(State, Vec<Effect>), KernelError> {
    let mut effects = Vec::new();
    let action = cmd.name();

    match cmd {
        // ====================================================================
        // Housekeeping
        // ====================================================================
        Command::ResolveExpired => {
            let state = resolve_expired(state, now, &mut effects);
            Ok((state, effects))
        }

        // ====================================================================
        // Governance
        // ====================================================================
        Command::ProposeUpgrade {
            proposer,
            target_version,
            implementation,
            migration,
            description,
        } => {
            // Precondition: proposer holds proposal rights
            if !state.can_propose(&proposer) {
                return Err(KernelError::Unauthorized {
                    identity: proposer,
                    action,
                });
            }

            // Precondition: target is newer and not bound to other code
            state
                .versions
                .check_upgrade_target(target_version, &implementation)?;

            // Precondition: an attached plan must end at the target
            if let Some(key) = migration {
                if key.to != target_version {
                    return Err(KernelError::InvalidPlan {
                        key,
                        reason: format!(
                            "plan ends at {}, proposal targets {target_version}",
                            key.to
                        ),
                    });
                }
            }

            let current = state.versions.current();
            let mut state = state;
            let (proposals, id) = state.proposals.allocate_id();

            let proposal = UpgradeProposal {
                id,
                proposer: proposer.clone(),
                target_version,
                implementation: implementation.clone(),
                migration,
                description,
                major_upgrade: !is_compatible(current, target_version),
                status: UpgradeStatus::Pending,
                votes_for: 0,
                votes_against: 0,
                voters: std::collections::BTreeSet::new(),
                created_at: now,
                voting_deadline: now.saturating_add(state.params.voting_period),
            };
            let voting_deadline = proposal.voting_deadline;

            state.proposals = proposals.with_proposal(proposal);

            // Postcondition: proposal exists and is pending
            debug_assert_eq!(
                state.proposals.get(id).map(|p| p.status),
                Some(UpgradeStatus::Pending)
            );

            effects.push(Effect::ProposalCreated {
                proposal_id: id,
                proposer,
                target_version,
                implementation,
                voting_deadline,
            });

            Ok((state, effects))
        }

        Command::Vote {
            voter,
            proposal_id,
            support,
        } => {
            let proposal = state.proposals.require(proposal_id)?.clone();

            // Precondition: only eligible voters vote
            if !state.can_vote(&voter) {
                return Err(KernelError::Unauthorized {
                    identity: voter,
                    action,
                });
            }

            let proposal = proposal.with_vote(voter.clone(), support, now)?;

            effects.push(Effect::VoteRecorded {
                proposal_id,
                voter,
                support,
                votes_for: proposal.votes_for,
                votes_against: proposal.votes_against,
            });

            let mut state = state;
            state.proposals = state.proposals.with_proposal(proposal);
            Ok((state, effects))
        }

        Command::Tally {
            caller,
            proposal_id,
        } => {
            let proposal = state.proposals.require(proposal_id)?;

            // Precondition: tallying is open to anyone with a governance role
            if !state.can_vote(&caller) && !state.can_propose(&caller) {
                return Err(KernelError::Unauthorized {
                    identity: caller,
                    action,
                });
            }

            // Already resolved: tallying again changes nothing
            if proposal.status != UpgradeStatus::Pending {
                return Ok((state, effects));
            }

            let status = match evaluate(&state, proposal, now) {
                Decision::Approved => UpgradeStatus::Approved,
                Decision::Rejected => UpgradeStatus::Rejected,
                Decision::Undecided => return Err(KernelError::VotingOpen(proposal_id)),
            };

            let state = with_resolution(state, proposal_id, status, &mut effects);
            Ok((state, effects))
        }

        Command::ExecuteUpgrade {
            executor,
            proposal_id,
        } => execute_upgrade(state, now, executor, proposal_id, action),

        Command::CancelProposal {
            caller,
            proposal_id,
        } => {
            let proposal = state.proposals.require(proposal_id)?;

            // Precondition: only the proposer or the admin may cancel
            if proposal.proposer != caller && !state.proxy.is_admin(&caller) {
                return Err(KernelError::Unauthorized {
                    identity: caller,
                    action,
                });
            }

            // Precondition: not yet executed or otherwise terminal
            if !proposal.status.can_transition_to(UpgradeStatus::Cancelled) {
                return Err(KernelError::InvalidTransition {
                    proposal_id,
                    status: proposal.status,
                    action,
                });
            }

            let cancelled = proposal.clone().with_status(UpgradeStatus::Cancelled);
            let mut state = state;
            state.proposals = state.proposals.with_proposal(cancelled);

            effects.push(Effect::ProposalCancelled {
                proposal_id,
                cancelled_by: caller,
            });

            Ok((state, effects))
        }

        Command::RegisterPlan { caller, plan } => {
            // Precondition: admin or proposer
            if !state.can_propose(&caller) {
                return Err(KernelError::Unauthorized {
                    identity: caller,
                    action,
                });
            }

            let key = plan.key();
            let steps = plan.steps.len();
            let reversible = plan.reversible;

            let mut state = state;
            state.plans = state.plans.register(plan)?;

            effects.push(Effect::PlanRegistered {
                key,
                steps,
                reversible,
            });

            Ok((state, effects))
        }

        // ====================================================================
        // Emergency and rollback
        // ====================================================================
        Command::SetEmergencyMode { admin, enabled } => {
            state.proxy.ensure_admin(&admin, action)?;

            let mut state = state;
            if enabled {
                state.emergency = EmergencyState::enabled(now, state.params.emergency_duration);
                effects.push(Effect::EmergencyModeChanged {
                    enabled: true,
                    expires_at: state.emergency.expires_at,
                });
            } else if state.emergency.expires_at.is_some() {
                state.emergency = EmergencyState::disabled();
                effects.push(Effect::EmergencyModeChanged {
                    enabled: false,
                    expires_at: None,
                });
            }

            Ok((state, effects))
        }

        Command::EmergencyUpgrade {
            admin,
            implementation,
            target_version,
        } => {
            state.proxy.ensure_admin(&admin, action)?;

            // Precondition: bypass only inside the emergency window
            if !state.is_emergency_active(now) {
                return Err(KernelError::EmergencyModeDisabled);
            }

            state
                .versions
                .check_upgrade_target(target_version, &implementation)?;

            // A registered plan for this exact transition runs if one exists
            let key = PlanKey::new(state.versions.current(), target_version);
            let plan = state.plans.get(&key).cloned();
            let registered_plan = plan.as_ref().map(MigrationPlan::key);

            let (state, _) = perform_upgrade(
                state,
                now,
                Upgrade {
                    proposal_id: None,
                    source: UpgradeSource::Emergency,
                    change: VersionChange::Emergency,
                    target: target_version,
                    implementation,
                    executor: admin,
                    plans: plan.into_iter().collect(),
                    registered_plan,
                },
                &mut effects,
            )?;

            Ok((state, effects))
        }

        Command::Rollback {
            admin,
            target_version,
        } => {
            state.proxy.ensure_admin(&admin, action)?;

            let current = state.versions.current();
            let path = plan_rollback(
                &state.audit,
                &state.plans,
                current,
                target_version,
                state.params.rollback_window,
            )?;

            let (state, _) = perform_upgrade(
                state,
                now,
                Upgrade {
                    proposal_id: None,
                    source: UpgradeSource::Rollback,
                    change: VersionChange::Rollback,
                    target: target_version,
                    implementation: path.implementation,
                    executor: admin,
                    plans: path.inverse_plans,
                    registered_plan: None,
                },
                &mut effects,
            )?;

            Ok((state, effects))
        }

        // ====================================================================
        // Proxy administration
        // ====================================================================
        Command::TransferAdmin { admin, new_admin } => {
            state.proxy.ensure_admin(&admin, action)?;

            let mut state = state;
            state.proxy = state.proxy.with_admin(new_admin.clone());

            // Postcondition: old admin lost its rights immediately
            debug_assert!(admin == new_admin || !state.proxy.is_admin(&admin));

            effects.push(Effect::AdminTransferred {
                from: admin,
                to: new_admin,
            });

            Ok((state, effects))
        }

        Command::SetPaused { admin, paused } => {
            state.proxy.ensure_admin(&admin, action)?;

            if state.proxy.paused == paused {
                return Ok((state, effects));
            }

            let mut state = state;
            state.proxy = state.proxy.with_paused(paused);
            effects.push(Effect::PauseChanged { paused });

            Ok((state, effects))
        }

        Command::GrantRole {
            admin,
            identity,
            role,
        } => {
            state.proxy.ensure_admin(&admin, action)?;

            let mut state = state;
            if state.roles.grant(identity.clone(), role) {
                effects.push(Effect::RoleChanged {
                    identity,
                    role,
                    granted: true,
                });
            }

            Ok((state, effects))
        }

        Command::RevokeRole {
            admin,
            identity,
            role,
        } => {
            state.proxy.ensure_admin(&admin, action)?;

            let mut state = state;
            if !state.roles.revoke(&identity, role) {
                return Err(KernelError::UnknownIdentity { identity, role });
            }

            effects.push(Effect::RoleChanged {
                identity,
                role,
                granted: false,
            });

            Ok((state, effects))
        }

        // ====================================================================
        // Forwarded calls
        // ====================================================================
        Command::CommitCall {
            caller,
            implementation,
            data,
        } => {
            state.proxy.ensure_running()?;

            // Precondition: the proxy was not swapped while the call ran
            if state.proxy.implementation != implementation {
                return Err(KernelError::ImplementationMismatch {
                    expected: state.proxy.implementation.clone(),
                    actual: implementation,
                });
            }

            let keys = data.len();
            let mut state = state;
            state.data = data;

            effects.push(Effect::DataCommitted {
                caller,
                implementation,
                keys,
            });

            Ok((state, effects))
        }
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolves expired proposals and clears an expired emergency window.
fn resolve_expired(mut state: State, now: Timestamp, effects: &mut Vec<Effect>) -> State {
    let expired: Vec<(ProposalId, Decision)> = state
        .proposals
        .active()
        .filter(|p| p.status == UpgradeStatus::Pending && now >= p.voting_deadline)
        .map(|p| (p.id, evaluate(&state, p, now)))
        .collect();

    for (proposal_id, decision) in expired {
        // Postcondition of `decide`: cast votes are final after the deadline
        debug_assert_ne!(decision, Decision::Undecided);

        let status = if decision == Decision::Approved {
            UpgradeStatus::Approved
        } else {
            UpgradeStatus::Rejected
        };
        state = with_resolution(state, proposal_id, status, effects);
    }

    if state.emergency.is_expired(now) {
        state.emergency = EmergencyState::disabled();
        effects.push(Effect::EmergencyModeChanged {
            enabled: false,
            expires_at: None,
        });
    }

    state
}

fn evaluate(state: &State, proposal: &UpgradeProposal, now: Timestamp) -> Decision {
    decide(
        state.params.threshold,
        state.params.quorum,
        proposal.votes_for,
        proposal.votes_against,
        state.outstanding_voters(proposal),
        now >= proposal.voting_deadline,
    )
}

fn with_resolution(
    mut state: State,
    proposal_id: ProposalId,
    status: UpgradeStatus,
    effects: &mut Vec<Effect>,
) -> State {
    if let Some(proposal) = state.proposals.get(proposal_id).cloned() {
        state.proposals = state.proposals.with_proposal(proposal.with_status(status));
        effects.push(Effect::ProposalResolved {
            proposal_id,
            status,
        });
    }
    state
}

// ============================================================================
// Upgrade execution
// ============================================================================

fn execute_upgrade(
    state: State,
    now: Timestamp,
    executor: Identity,
    proposal_id: ProposalId,
    action: &'static str,
) -> Result<(State, Vec<Effect>), KernelError> {
    let mut effects = Vec::new();
    let proposal = state.proposals.require(proposal_id)?.clone();

    // Precondition: governance executor
    if !state.can_propose(&executor) {
        return Err(KernelError::Unauthorized {
            identity: executor,
            action,
        });
    }

    // Precondition: voted through
    match proposal.status {
        UpgradeStatus::Approved => {}
        UpgradeStatus::Rejected => return Err(KernelError::ThresholdNotMet(proposal_id)),
        status => {
            return Err(KernelError::InvalidTransition {
                proposal_id,
                status,
                action,
            });
        }
    }

    state.proxy.ensure_running()?;

    // Precondition: still a forward move from whatever is current now
    state
        .versions
        .check_upgrade_target(proposal.target_version, &proposal.implementation)?;

    let current = state.versions.current();
    let target = proposal.target_version;
    let plan = match proposal.migration {
        Some(key) => {
            let plan = state
                .plans
                .get(&key)
                .ok_or(KernelError::PlanNotFound(key))?;

            // Precondition: plan starts where the data is now
            if plan.from_version != current || plan.to_version != target {
                return Err(KernelError::InvalidPlan {
                    key,
                    reason: format!("plan does not cover {current} -> {target}"),
                });
            }
            Some(plan.clone())
        }
        None => None,
    };

    let (mut state, aborted) = perform_upgrade(
        state,
        now,
        Upgrade {
            proposal_id: Some(proposal_id),
            source: UpgradeSource::Governance,
            change: VersionChange::Governed {
                major_upgrade: proposal.major_upgrade,
            },
            target,
            implementation: proposal.implementation.clone(),
            executor,
            plans: plan.into_iter().collect(),
            registered_plan: proposal.migration,
        },
        &mut effects,
    )?;

    let status = if aborted.is_some() {
        UpgradeStatus::Failed
    } else {
        UpgradeStatus::Executed
    };

    state.proposals = state.proposals.with_proposal(proposal.with_status(status));
    effects.push(Effect::ProposalResolved {
        proposal_id,
        status,
    });

    // Postcondition: an executed proposal's target is live
    debug_assert!(status == UpgradeStatus::Failed || state.versions.current() == target);

    Ok((state, effects))
}

/// Parameters shared by every path that changes the live version.
struct Upgrade {
    proposal_id: Option<ProposalId>,
    source: UpgradeSource,
    change: VersionChange,
    target: Version,
    implementation: ImplementationRef,
    executor: Identity,
    /// Plans to apply in order.
    plans: Vec<MigrationPlan>,
    /// Registered plan recorded in the audit entry.
    registered_plan: Option<PlanKey>,
}

/// Version check, migration, implementation swap and audit entry as one unit.
///
/// Returns `Err` for precondition failures; the caller's state is then
/// discarded. A migration failure instead returns `Ok` with the data,
/// version and proxy untouched and a `Failed` audit entry appended.
fn perform_upgrade(
    mut state: State,
    now: Timestamp,
    upgrade: Upgrade,
    effects: &mut Vec<Effect>,
) -> Result<(State, Option<MigrationError>), KernelError> {
    let from_version = state.versions.current();
    let from_implementation = state.proxy.implementation.clone();

    // Compatibility is checked before any data is touched
    let versions = state.versions.clone().set_current(
        upgrade.target,
        &upgrade.implementation,
        upgrade.change,
    )?;

    let mut staged = state.data.clone();
    let mut applied = Vec::with_capacity(upgrade.plans.len());
    let mut failure = None;

    for plan in &upgrade.plans {
        if let Err(error) = migration::apply(plan, &mut staged) {
            failure = Some(error);
            break;
        }
        applied.push(Effect::MigrationApplied {
            key: plan.key(),
            steps: plan.steps.len(),
        });
    }

    let pending = |outcome| PendingTransaction {
        proposal_id: upgrade.proposal_id,
        source: upgrade.source,
        from_version,
        to_version: upgrade.target,
        from_implementation: from_implementation.clone(),
        to_implementation: upgrade.implementation.clone(),
        executor: upgrade.executor.clone(),
        outcome,
        migration: upgrade.registered_plan,
    };

    if let Some(error) = failure {
        let (audit, tx) = state.audit.append(
            pending(UpgradeOutcome::Failed {
                reason: error.to_string(),
            }),
            now,
        );
        state.audit = audit;

        // Postcondition: nothing live moved
        debug_assert_eq!(state.versions.current(), from_version);
        debug_assert_eq!(state.proxy.implementation, from_implementation);

        effects.push(Effect::MigrationAborted {
            error: error.clone(),
        });
        effects.push(Effect::AuditLogAppend(tx));
        return Ok((state, Some(error)));
    }

    let (audit, tx) = state.audit.append(pending(UpgradeOutcome::Success), now);

    state.data = staged;
    state.versions = versions;
    state.proxy = state
        .proxy
        .with_implementation(upgrade.implementation.clone(), now);
    state.audit = audit;

    // Postcondition: registry and proxy agree on the live implementation
    assert_eq!(
        state.versions.binding(&state.versions.current()),
        Some(&state.proxy.implementation),
        "version registry and proxy diverged after upgrade to {}",
        upgrade.target
    );

    effects.extend(applied);
    effects.push(Effect::VersionChanged {
        from: from_version,
        to: upgrade.target,
        source: upgrade.source,
    });
    effects.push(Effect::ImplementationSwapped {
        from: from_implementation,
        to: upgrade.implementation,
        generation: state.proxy.generation,
    });
    effects.push(Effect::AuditLogAppend(tx));

    Ok((state, None))
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur when applying commands to the kernel.
///
/// Every variant leaves the caller's state untouched.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    // Authorization
    #[error("{identity} is not authorized to {action}")]
    Unauthorized {
        identity: Identity,
        action: &'static str,
    },

    #[error("{identity} does not hold the {role} role")]
    UnknownIdentity { identity: Identity, role: Role },

    // Versions
    #[error("invalid version {target}: {reason}")]
    InvalidVersion { target: Version, reason: String },

    #[error("version {target} is incompatible with current version {current}")]
    IncompatibleVersion { current: Version, target: Version },

    // Proposals and voting
    #[error("proposal {0} not found")]
    ProposalNotFound(ProposalId),

    #[error("voting on proposal {0} is closed")]
    VotingClosed(ProposalId),

    #[error("{voter} already voted on proposal {proposal_id}")]
    AlreadyVoted {
        proposal_id: ProposalId,
        voter: Identity,
    },

    #[error("proposal {0} is still undecided")]
    VotingOpen(ProposalId),

    #[error("proposal {0} did not reach the approval threshold")]
    ThresholdNotMet(ProposalId),

    #[error("cannot {action} proposal {proposal_id} while it is {status}")]
    InvalidTransition {
        proposal_id: ProposalId,
        status: UpgradeStatus,
        action: &'static str,
    },

    // Migrations
    #[error(transparent)]
    MigrationFailed(#[from] MigrationError),

    #[error("migration plan {0} is already registered")]
    DuplicatePlan(PlanKey),

    #[error("invalid migration plan {key}: {reason}")]
    InvalidPlan { key: PlanKey, reason: String },

    #[error("migration plan {0} is not registered")]
    PlanNotFound(PlanKey),

    #[error("migration plan {0} cannot be reversed")]
    IrreversibleMigration(PlanKey),

    // Emergency and rollback
    #[error("emergency mode is not active")]
    EmergencyModeDisabled,

    #[error("version {target} is outside the rollback window of {window} upgrades")]
    RollbackWindowExceeded { target: Version, window: u32 },

    // Proxy
    #[error("proxy is paused")]
    ProxyPaused,

    #[error("proxy now points to {expected}, call ran against {actual}")]
    ImplementationMismatch {
        expected: ImplementationRef,
        actual: ImplementationRef,
    },
}
