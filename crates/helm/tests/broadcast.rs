//! Governance events published by the governor (requires `broadcast`).

#![cfg(feature = "broadcast")]

mod common;

use helm::broadcast::{GovernanceBroadcast, GovernanceEvent};
use helm::{Genesis, Governor, GovernanceParams, UpgradeSource, UpgradeStatus};

use common::{ADMIN, Ledger, VOTERS, handle, v};

#[test]
fn upgrade_lifecycle_is_published_in_order() {
    let genesis = Genesis::new(v(1, 0, 0), handle(v(1, 0, 0)), ADMIN).with_voters(VOTERS);
    let governor = Governor::builder(genesis)
        .params(GovernanceParams::default())
        .broadcast(GovernanceBroadcast::new(64))
        .build();
    let mut rx = governor.subscribe().expect("broadcast configured");

    governor
        .deploy(handle(v(1, 1, 0)), Ledger::new("1.1.0"))
        .unwrap();
    let id = governor
        .propose_upgrade(ADMIN, v(1, 1, 0), handle(v(1, 1, 0)), None, "minor")
        .unwrap();
    for voter in VOTERS {
        governor.vote_on_proposal(voter, id, true).unwrap();
    }
    governor.tally(ADMIN, id).unwrap();
    governor.execute_upgrade(ADMIN, id).unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert!(matches!(
        events.first(),
        Some(GovernanceEvent::ProposalCreated { proposal_id, .. }) if *proposal_id == id
    ));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, GovernanceEvent::VoteRecorded { .. }))
            .count(),
        3
    );
    assert!(events.contains(&GovernanceEvent::ProposalResolved {
        proposal_id: id,
        status: UpgradeStatus::Approved,
    }));
    assert!(events.iter().any(|e| matches!(
        e,
        GovernanceEvent::UpgradeCommitted {
            source: UpgradeSource::Governance,
            ..
        }
    )));
    assert_eq!(
        events.last(),
        Some(&GovernanceEvent::ProposalResolved {
            proposal_id: id,
            status: UpgradeStatus::Executed,
        })
    );
}

#[test]
fn governor_without_broadcaster_has_no_subscription() {
    let genesis = Genesis::new(v(1, 0, 0), handle(v(1, 0, 0)), ADMIN);
    let governor = Governor::new(genesis, GovernanceParams::default());
    assert!(governor.subscribe().is_none());
}
