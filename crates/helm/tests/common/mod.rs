//! Shared fixtures for governor integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use helm::{
    Call, CallContext, CallError, DataStore, Genesis, GovernanceParams, Governor, Implementation,
    ManualClock, MigrationPlan, PlanKey, ProposalId, Timestamp, UpgradeStatus,
    UpgradeTransaction, Value, Version,
};

pub const ADMIN: &str = "admin";
pub const VOTERS: [&str; 3] = ["alice", "bob", "carol"];
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

pub fn v(major: u32, minor: u32, patch: u32) -> Version {
    Version::new(major, minor, patch)
}

pub fn handle(version: Version) -> String {
    format!("impl-{version}")
}

pub fn genesis_data() -> DataStore {
    [
        ("balance", Value::Int(100)),
        ("owner", Value::from("alice")),
    ]
    .into_iter()
    .collect()
}

/// A toy account ledger. Every version shares the calling convention; the
/// tag shows which deployed code served a call.
pub struct Ledger {
    pub tag: String,
}

impl Ledger {
    pub fn new(tag: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { tag: tag.into() })
    }
}

impl Implementation for Ledger {
    fn call(
        &self,
        ctx: &CallContext<'_>,
        call: &Call,
        store: &mut DataStore,
    ) -> Result<Bytes, CallError> {
        match call.method.as_str() {
            "whoami" => Ok(Bytes::from(format!("{}@{}", ctx.caller, self.tag))),
            "version" => Ok(Bytes::from(ctx.version.to_string())),
            "balance" => {
                let balance = balance(store)?;
                Ok(Bytes::from(balance.to_string()))
            }
            "deposit" => {
                let amount = int_arg(&call.args)?;
                let balance = balance(store)? + amount;
                store.insert("balance", balance);
                Ok(Bytes::from(balance.to_string()))
            }
            "overdraw" => {
                // Writes first, then fails: the write must not survive
                store.insert("balance", -1);
                Err(CallError::Rejected("insufficient funds".to_string()))
            }
            other => Err(CallError::UnknownMethod(other.to_string())),
        }
    }
}

fn balance(store: &DataStore) -> Result<i64, CallError> {
    store
        .get("balance")
        .and_then(Value::as_int)
        .ok_or_else(|| CallError::Rejected("no balance".to_string()))
}

fn int_arg(args: &Bytes) -> Result<i64, CallError> {
    std::str::from_utf8(args)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CallError::InvalidArgs("expected an integer".to_string()))
}

/// A governor on a manual clock at version 1.2.0, with three voters and
/// the genesis implementation deployed.
pub struct Harness {
    pub governor: Governor,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_params(GovernanceParams::default())
    }

    pub fn with_params(params: GovernanceParams) -> Self {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1_000)));
        let genesis = Genesis::new(v(1, 2, 0), handle(v(1, 2, 0)), ADMIN)
            .with_data(genesis_data())
            .with_voters(VOTERS);

        let governor = Governor::builder(genesis)
            .params(params)
            .clock(clock.clone())
            .build();
        governor
            .deploy(handle(v(1, 2, 0)), Ledger::new("1.2.0"))
            .expect("genesis deploy");

        Self { governor, clock }
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Deploys a ledger for `version` under its conventional handle.
    pub fn deploy(&self, version: Version) {
        self.governor
            .deploy(handle(version), Ledger::new(version.to_string()))
            .expect("deploy");
    }

    pub fn register(&self, plan: MigrationPlan) -> PlanKey {
        self.governor
            .register_migration_plan(ADMIN, plan)
            .expect("register plan")
    }

    /// Deploys and proposes `target` without voting.
    pub fn propose(&self, target: Version) -> ProposalId {
        self.deploy(target);
        self.governor
            .propose_upgrade(ADMIN, target, handle(target), None, "test upgrade")
            .expect("propose")
    }

    /// Deploys, proposes and unanimously approves `target`.
    pub fn approve(&self, target: Version, plan: Option<PlanKey>) -> ProposalId {
        self.deploy(target);
        let id = self
            .governor
            .propose_upgrade(ADMIN, target, handle(target), plan, "test upgrade")
            .expect("propose");
        for voter in VOTERS {
            self.governor
                .vote_on_proposal(voter, id, true)
                .expect("vote");
        }
        assert_eq!(
            self.governor.tally(ADMIN, id).expect("tally"),
            UpgradeStatus::Approved
        );
        id
    }

    /// Runs a complete governed upgrade to `target`.
    pub fn upgrade(&self, target: Version, plan: Option<PlanKey>) -> UpgradeTransaction {
        let id = self.approve(target, plan);
        self.governor
            .execute_upgrade(ADMIN, id)
            .expect("execute upgrade")
    }

    pub fn call(&self, caller: &str, method: &str) -> String {
        let out = self
            .governor
            .call(caller, Call::method(method))
            .expect("forwarded call");
        String::from_utf8(out.to_vec()).expect("utf-8 reply")
    }
}
