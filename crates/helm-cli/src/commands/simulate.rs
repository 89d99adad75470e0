//! Replays a scenario script against an in-memory governor.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use helm::{Call, Clock, Governor, HelmError, ManualClock, Timestamp};
use helm_config::HelmConfig;

use crate::script::{Script, ScriptedLedger, Step};
use crate::table::{audit_table, info_table};

/// Runs every step of the script at `path`, then prints the final state.
pub fn run(path: &str, project: &str, fail_fast: bool, json: bool) -> Result<()> {
    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read script {path}"))?;
    let script: Script =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse script {path}"))?;

    let config = HelmConfig::load_from_dir(project).context("Failed to load configuration")?;
    let params = config.governance_params()?;

    let clock = Arc::new(ManualClock::new(Timestamp::from_secs(script.start_secs)));
    let governor = Governor::builder(script.genesis.to_genesis())
        .params(params)
        .clock(clock.clone())
        .build();
    governor.deploy(script.genesis.implementation.as_str(), ScriptedLedger::new())?;

    tracing::info!(steps = script.steps.len(), script = path, "replaying scenario");

    let mut failures = 0usize;
    for (index, step) in script.steps.iter().enumerate() {
        let number = index + 1;
        match apply(&governor, &clock, step) {
            Ok(detail) => {
                if !json {
                    match detail {
                        Some(detail) => println!("{number:>3}  ✓ {step} -> {detail}"),
                        None => println!("{number:>3}  ✓ {step}"),
                    }
                }
            }
            Err(err) => {
                if fail_fast {
                    bail!("step {number} ({step}) failed: {err}");
                }
                failures += 1;
                tracing::debug!(step = number, error = %err, "step failed");
                if !json {
                    println!("{number:>3}  ✗ {step}: {err}");
                }
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&governor.snapshot()?)?);
        return Ok(());
    }

    let proxy = governor.proxy_info()?;
    let emergency = governor.emergency_status()?;
    let deployed = governor
        .deployed()?
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let hash: String = governor
        .state_hash()?
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();

    println!();
    println!("{} steps, {failures} failed", script.steps.len());
    println!(
        "{}",
        info_table(&[
            ("Version", governor.current_version()?.to_string()),
            (
                "Implementation",
                format!("{} (generation {})", proxy.implementation, proxy.generation)
            ),
            ("Deployed", deployed),
            ("Admin", proxy.admin.to_string()),
            ("Paused", proxy.paused.to_string()),
            (
                "Emergency",
                if emergency.active { "active" } else { "inactive" }.to_string()
            ),
            ("Pending proposals", governor.pending_proposals()?.len().to_string()),
            ("State hash", hash),
        ])
    );

    let log = governor.audit_log()?;
    if log.is_empty() {
        println!("Audit log is empty.");
    } else {
        println!("{}", audit_table(&log));
    }

    Ok(())
}

/// Applies one step, returning a short description of its result.
fn apply(
    governor: &Governor,
    clock: &ManualClock,
    step: &Step,
) -> Result<Option<String>, HelmError> {
    let detail = match step {
        Step::Deploy { handle } => {
            governor.deploy(handle.as_str(), ScriptedLedger::new())?;
            None
        }
        Step::Advance { secs } => {
            clock.advance(Duration::from_secs(*secs));
            governor.resolve_expired()?;
            Some(format!("t={}", clock.now()))
        }
        Step::Propose {
            proposer,
            target,
            implementation,
            migration,
            description,
        } => {
            let id = governor.propose_upgrade(
                proposer.as_str(),
                *target,
                implementation.as_str(),
                *migration,
                description.as_str(),
            )?;
            Some(format!("proposal {id}"))
        }
        Step::Vote {
            voter,
            proposal,
            support,
        } => {
            governor.vote_on_proposal(voter.as_str(), *proposal, *support)?;
            None
        }
        Step::Tally { caller, proposal } => {
            Some(governor.tally(caller.as_str(), *proposal)?.to_string())
        }
        Step::Execute { executor, proposal } => {
            let tx = governor.execute_upgrade(executor.as_str(), *proposal)?;
            Some(format!("tx {}: {} -> {}", tx.id, tx.from_version, tx.to_version))
        }
        Step::Cancel { caller, proposal } => {
            governor.cancel_proposal(caller.as_str(), *proposal)?;
            None
        }
        Step::RegisterPlan { caller, plan } => {
            let key = governor.register_migration_plan(caller.as_str(), plan.clone())?;
            Some(format!("plan {key}"))
        }
        Step::EnableEmergency { admin } => {
            let status = governor.enable_emergency_mode(admin.as_str())?;
            status
                .expires_at
                .map(|expires_at| format!("expires at t={expires_at}"))
        }
        Step::DisableEmergency { admin } => {
            governor.disable_emergency_mode(admin.as_str())?;
            None
        }
        Step::EmergencyUpgrade {
            admin,
            implementation,
            target,
        } => {
            let tx =
                governor.emergency_upgrade(admin.as_str(), implementation.as_str(), *target)?;
            Some(format!("tx {}: {} -> {}", tx.id, tx.from_version, tx.to_version))
        }
        Step::Rollback { admin, target } => {
            let tx = governor.rollback_to_version(admin.as_str(), *target)?;
            Some(format!("tx {}: {} -> {}", tx.id, tx.from_version, tx.to_version))
        }
        Step::TransferAdmin { admin, new_admin } => {
            governor.transfer_admin(admin.as_str(), new_admin.as_str())?;
            None
        }
        Step::Stop { admin } => {
            governor.emergency_stop(admin.as_str())?;
            None
        }
        Step::Resume { admin } => {
            governor.resume(admin.as_str())?;
            None
        }
        Step::GrantRole {
            admin,
            identity,
            role,
        } => {
            governor.grant_role(admin.as_str(), identity.as_str(), *role)?;
            None
        }
        Step::RevokeRole {
            admin,
            identity,
            role,
        } => {
            governor.revoke_role(admin.as_str(), identity.as_str(), *role)?;
            None
        }
        Step::Call {
            caller,
            method,
            args,
        } => {
            let call = Call::new(method.as_str(), args.clone());
            let reply = governor.call(caller.as_str(), call)?;
            Some(String::from_utf8_lossy(&reply).into_owned())
        }
    };

    Ok(detail)
}
