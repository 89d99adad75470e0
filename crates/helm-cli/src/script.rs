//! Scenario scripts for `helm simulate`.
//!
//! A script is a JSON document with a genesis block and an ordered list of
//! steps, one per governor operation:
//!
//! ```json
//! {
//!   "genesis": { "version": "1.2.0", "implementation": "impl-1.2.0",
//!                "admin": "admin", "voters": ["alice", "bob", "carol"] },
//!   "steps": [
//!     { "op": "deploy", "handle": "impl-2.0.0" },
//!     { "op": "propose", "proposer": "admin", "target": "2.0.0",
//!       "implementation": "impl-2.0.0" },
//!     { "op": "vote", "voter": "alice", "proposal": 0, "support": true }
//!   ]
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use helm::{
    Call, CallContext, CallError, DataStore, Genesis, Implementation, MigrationPlan, PlanKey,
    ProposalId, Role, Value, Version,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    pub genesis: ScriptGenesis,
    /// Clock reading, in seconds, when the script starts.
    #[serde(default)]
    pub start_secs: u64,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptGenesis {
    pub version: Version,
    pub implementation: String,
    pub admin: String,
    #[serde(default)]
    pub voters: Vec<String>,
    #[serde(default)]
    pub proposers: Vec<String>,
    #[serde(default)]
    pub data: DataStore,
}

impl ScriptGenesis {
    pub fn to_genesis(&self) -> Genesis {
        let mut genesis = Genesis::new(
            self.version,
            self.implementation.as_str(),
            self.admin.as_str(),
        )
        .with_data(self.data.clone())
        .with_voters(self.voters.iter().map(String::as_str));
        for proposer in &self.proposers {
            genesis = genesis.with_role(proposer.as_str(), Role::Proposer);
        }
        genesis
    }
}

/// One governor operation.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    /// Uploads a scripted ledger under `handle`.
    Deploy { handle: String },
    /// Moves the simulation clock forward.
    Advance { secs: u64 },
    Propose {
        proposer: String,
        target: Version,
        implementation: String,
        #[serde(default)]
        migration: Option<PlanKey>,
        #[serde(default)]
        description: String,
    },
    Vote {
        voter: String,
        proposal: ProposalId,
        support: bool,
    },
    Tally { caller: String, proposal: ProposalId },
    Execute { executor: String, proposal: ProposalId },
    Cancel { caller: String, proposal: ProposalId },
    RegisterPlan { caller: String, plan: MigrationPlan },
    EnableEmergency { admin: String },
    DisableEmergency { admin: String },
    EmergencyUpgrade {
        admin: String,
        implementation: String,
        target: Version,
    },
    Rollback { admin: String, target: Version },
    TransferAdmin { admin: String, new_admin: String },
    Stop { admin: String },
    Resume { admin: String },
    GrantRole {
        admin: String,
        identity: String,
        role: Role,
    },
    RevokeRole {
        admin: String,
        identity: String,
        role: Role,
    },
    Call {
        caller: String,
        method: String,
        #[serde(default)]
        args: String,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Deploy { handle } => write!(f, "deploy {handle}"),
            Step::Advance { secs } => write!(f, "advance {secs}s"),
            Step::Propose {
                proposer, target, ..
            } => write!(f, "{proposer} proposes {target}"),
            Step::Vote {
                voter,
                proposal,
                support,
            } => {
                let side = if *support { "for" } else { "against" };
                write!(f, "{voter} votes {side} proposal {proposal}")
            }
            Step::Tally { caller, proposal } => write!(f, "{caller} tallies proposal {proposal}"),
            Step::Execute { executor, proposal } => {
                write!(f, "{executor} executes proposal {proposal}")
            }
            Step::Cancel { caller, proposal } => write!(f, "{caller} cancels proposal {proposal}"),
            Step::RegisterPlan { caller, plan } => {
                write!(f, "{caller} registers plan {}", plan.key())
            }
            Step::EnableEmergency { admin } => write!(f, "{admin} enables emergency mode"),
            Step::DisableEmergency { admin } => write!(f, "{admin} disables emergency mode"),
            Step::EmergencyUpgrade { admin, target, .. } => {
                write!(f, "{admin} emergency-upgrades to {target}")
            }
            Step::Rollback { admin, target } => write!(f, "{admin} rolls back to {target}"),
            Step::TransferAdmin { admin, new_admin } => {
                write!(f, "{admin} transfers admin to {new_admin}")
            }
            Step::Stop { admin } => write!(f, "{admin} stops the proxy"),
            Step::Resume { admin } => write!(f, "{admin} resumes the proxy"),
            Step::GrantRole {
                admin,
                identity,
                role,
            } => write!(f, "{admin} grants {role} to {identity}"),
            Step::RevokeRole {
                admin,
                identity,
                role,
            } => write!(f, "{admin} revokes {role} from {identity}"),
            Step::Call { caller, method, .. } => write!(f, "{caller} calls {method}"),
        }
    }
}

// ============================================================================
// Scripted implementation
// ============================================================================

/// Key-value code deployed for every handle a script names.
///
/// Methods: `whoami`, `version`, `get <key>`, `set <key>=<value>` and
/// `incr <key>=<delta>`. Values that parse as integers are stored as ints.
pub struct ScriptedLedger;

impl ScriptedLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Implementation for ScriptedLedger {
    fn call(
        &self,
        ctx: &CallContext<'_>,
        call: &Call,
        store: &mut DataStore,
    ) -> Result<Bytes, CallError> {
        let args = std::str::from_utf8(&call.args)
            .map_err(|_| CallError::InvalidArgs("arguments must be UTF-8".to_string()))?;

        let reply = match call.method.as_str() {
            "whoami" => ctx.caller.to_string(),
            "version" => format!("{} v{}", ctx.implementation, ctx.version),
            "get" => store
                .get(args)
                .map_or_else(|| "<none>".to_string(), ToString::to_string),
            "set" => {
                let (key, raw) = assignment(args)?;
                let value = raw
                    .parse::<i64>()
                    .map_or_else(|_| Value::from(raw), Value::Int);
                store.insert(key, value);
                "ok".to_string()
            }
            "incr" => {
                let (key, raw) = assignment(args)?;
                let delta: i64 = raw
                    .parse()
                    .map_err(|_| CallError::InvalidArgs(format!("{raw} is not an integer")))?;
                let current = match store.get(key) {
                    None => 0,
                    Some(value) => value.as_int().ok_or_else(|| {
                        CallError::Rejected(format!("{key} holds {}, not an int", value.kind()))
                    })?,
                };
                let next = current
                    .checked_add(delta)
                    .ok_or_else(|| CallError::Rejected(format!("{key} would overflow")))?;
                store.insert(key, next);
                next.to_string()
            }
            other => return Err(CallError::UnknownMethod(other.to_string())),
        };

        Ok(Bytes::from(reply))
    }
}

fn assignment(args: &str) -> Result<(&str, &str), CallError> {
    args.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| CallError::InvalidArgs(format!("expected key=value, got {args:?}")))
}
