//! Forwarded calls: pause, atomicity and reentrancy.

mod common;

use std::sync::{Arc, OnceLock};
use std::thread;

use bytes::Bytes;
use common::{ADMIN, Harness, Ledger, handle, v};
use helm::{
    Call, CallContext, CallError, DataStore, Genesis, GovernanceParams, Governor, HelmError,
    Implementation, KernelError, Value,
};
use proptest::prelude::*;

#[test]
fn stopped_proxy_rejects_calls_until_resumed() {
    let h = Harness::new();

    h.governor.emergency_stop(ADMIN).unwrap();
    assert!(h.governor.proxy_info().unwrap().paused);

    let err = h
        .governor
        .call("alice", Call::new("deposit", "10"))
        .unwrap_err();
    assert!(matches!(err, HelmError::Kernel(KernelError::ProxyPaused)));
    assert_eq!(h.governor.data().unwrap().get("balance"), Some(&Value::Int(100)));

    h.governor.resume(ADMIN).unwrap();
    let out = h.governor.call("alice", Call::new("deposit", "10")).unwrap();
    assert_eq!(out, Bytes::from("110"));
}

#[test]
fn pause_blocks_execution_but_not_governance() {
    let h = Harness::new();
    h.governor.emergency_stop(ADMIN).unwrap();

    // Proposing and voting continue while traffic is stopped
    let id = h.approve(v(1, 3, 0), None);

    let err = h.governor.execute_upgrade(ADMIN, id).unwrap_err();
    assert!(matches!(err, HelmError::Kernel(KernelError::ProxyPaused)));

    h.governor.resume(ADMIN).unwrap();
    h.governor.execute_upgrade(ADMIN, id).unwrap();
    assert_eq!(h.governor.current_version().unwrap(), v(1, 3, 0));
}

#[test]
fn only_the_admin_stops_the_proxy() {
    let h = Harness::new();
    let err = h.governor.emergency_stop("alice").unwrap_err();
    assert!(matches!(
        err,
        HelmError::Kernel(KernelError::Unauthorized { action: "emergency_stop", .. })
    ));
    assert!(!h.governor.proxy_info().unwrap().paused);
}

#[test]
fn failed_call_discards_its_writes() {
    let h = Harness::new();
    let before = h.governor.state_hash().unwrap();

    let err = h.governor.call("alice", Call::method("overdraw")).unwrap_err();
    match err {
        HelmError::Call { method, source, .. } => {
            assert_eq!(method, "overdraw");
            assert_eq!(source, CallError::Rejected("insufficient funds".to_string()));
        }
        other => panic!("expected a call error, got {other}"),
    }

    assert_eq!(h.governor.state_hash().unwrap(), before);
}

#[test]
fn calls_preserve_the_caller() {
    let h = Harness::new();
    assert_eq!(h.call("alice", "whoami"), "alice@1.2.0");
    assert_eq!(h.call("bob", "whoami"), "bob@1.2.0");
}

#[test]
fn admin_transfer_is_immediate() {
    let h = Harness::new();
    h.governor.transfer_admin(ADMIN, "ops").unwrap();

    assert_eq!(h.governor.proxy_info().unwrap().admin.as_str(), "ops");
    let err = h.governor.emergency_stop(ADMIN).unwrap_err();
    assert!(matches!(err, HelmError::Kernel(KernelError::Unauthorized { .. })));
    h.governor.emergency_stop("ops").unwrap();
}

#[test]
fn deploying_code_does_not_switch_the_proxy() {
    let h = Harness::new();
    h.deploy(v(1, 3, 0));

    let deployed = h.governor.deployed().unwrap();
    let names: Vec<&str> = deployed.iter().map(|handle| handle.as_str()).collect();
    assert_eq!(names, ["impl-1.2.0", "impl-1.3.0"]);
    assert_eq!(h.call("alice", "version"), "1.2.0");

    let err = h
        .governor
        .deploy(handle(v(1, 3, 0)), Ledger::new("again"))
        .unwrap_err();
    assert!(matches!(err, HelmError::AlreadyDeployed(_)));
    assert_eq!(h.governor.deployed().unwrap().len(), 2);
}

#[test]
fn undeployed_live_implementation_cannot_serve_calls() {
    let genesis = Genesis::new(v(1, 0, 0), "impl-1.0.0", ADMIN);
    let governor = Governor::new(genesis, GovernanceParams::default());

    let err = governor.call("alice", Call::method("ping")).unwrap_err();
    assert!(matches!(err, HelmError::UnknownImplementation(_)));
}

#[test]
fn concurrent_calls_never_lose_updates() {
    let h = Harness::new();
    let governor = &h.governor;

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(move || {
                for _ in 0..25 {
                    governor.call("alice", Call::new("deposit", "1")).unwrap();
                }
            });
        }
    });

    assert_eq!(h.call("alice", "balance"), "300");
}

// ============================================================================
// Reentrancy
// ============================================================================

/// Code that tries to drive the governor from inside a forwarded call.
struct Hijacker {
    governor: OnceLock<Governor>,
}

impl Implementation for Hijacker {
    fn call(
        &self,
        ctx: &CallContext<'_>,
        call: &Call,
        _store: &mut DataStore,
    ) -> Result<Bytes, CallError> {
        let governor = self
            .governor
            .get()
            .ok_or_else(|| CallError::Rejected("not wired".to_string()))?;

        let attempt = match call.method.as_str() {
            "transfer_admin" => governor.transfer_admin(ADMIN, "mallory").err(),
            "emergency_stop" => governor.emergency_stop(ADMIN).err(),
            "call" => governor.call(ctx.caller.clone(), Call::method("noop")).err(),
            "read" => {
                let version = governor
                    .current_version()
                    .map_err(|e| CallError::Rejected(e.to_string()))?;
                return Ok(Bytes::from(version.to_string()));
            }
            "noop" => return Ok(Bytes::new()),
            other => return Err(CallError::UnknownMethod(other.to_string())),
        };

        Ok(Bytes::from(
            attempt.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }
}

fn hijacked_governor() -> Governor {
    let genesis = Genesis::new(v(1, 0, 0), "hijack-1.0.0", ADMIN);
    let governor = Governor::new(genesis, GovernanceParams::default());

    let hijacker = Arc::new(Hijacker {
        governor: OnceLock::new(),
    });
    let _ = hijacker.governor.set(governor.clone());
    governor.deploy("hijack-1.0.0", hijacker).unwrap();
    governor
}

#[test]
fn forwarded_calls_cannot_reenter_admin_operations() {
    let governor = hijacked_governor();

    let reply = governor.call(ADMIN, Call::method("transfer_admin")).unwrap();
    assert_eq!(
        reply,
        Bytes::from("cannot transfer_admin while a forwarded call is in flight")
    );
    assert_eq!(governor.proxy_info().unwrap().admin.as_str(), ADMIN);

    let reply = governor.call(ADMIN, Call::method("emergency_stop")).unwrap();
    assert!(!reply.is_empty());
    assert!(!governor.proxy_info().unwrap().paused);

    // Outside a call the same operation is fine
    governor.transfer_admin(ADMIN, "ops").unwrap();
    assert_eq!(governor.proxy_info().unwrap().admin.as_str(), "ops");
}

#[test]
fn forwarded_calls_cannot_nest_but_may_read() {
    let governor = hijacked_governor();

    let reply = governor.call("alice", Call::method("call")).unwrap();
    assert_eq!(
        reply,
        Bytes::from("cannot call while a forwarded call is in flight")
    );

    let reply = governor.call("alice", Call::method("read")).unwrap();
    assert_eq!(reply, Bytes::from("1.0.0"));
}

proptest! {
    #[test]
    fn balance_reflects_only_successful_calls(
        ops in prop::collection::vec(prop::option::of(-1_000i64..1_000), 0..16)
    ) {
        let h = Harness::new();
        let mut expected = 100i64;

        for op in ops {
            match op {
                Some(amount) => {
                    h.governor
                        .call("alice", Call::new("deposit", amount.to_string()))
                        .unwrap();
                    expected += amount;
                }
                None => {
                    prop_assert!(h.governor.call("alice", Call::method("overdraw")).is_err());
                }
            }
        }

        let data = h.governor.data().unwrap();
        prop_assert_eq!(data.get("balance"), Some(&Value::Int(expected)));
    }
}
