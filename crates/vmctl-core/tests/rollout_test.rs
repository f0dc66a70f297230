//! Rollout tests against real agents on the loopback interface.

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vmctl_core::supervisor::{Phase, PhaseEvent, Rollout, RolloutConfig, Target};
use vmctl_test_utils::{msg, refused_addr, spawn_recording_agent};

fn config() -> RolloutConfig {
    RolloutConfig {
        connect_timeout: Duration::from_secs(2),
        phase_timeout: Duration::from_secs(2),
    }
}

fn target(name: &str, address: String) -> Target {
    Target {
        name: name.to_string(),
        address,
        config: msg(json!({"role": name, "s11_interface": "eth0"})),
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<PhaseEvent>) -> Vec<PhaseEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn position(events: &[PhaseEvent], phase: Phase, pick_last: bool) -> usize {
    let mut positions = events.iter().enumerate().filter(|(_, e)| e.phase == phase);
    let found = if pick_last {
        positions.last()
    } else {
        positions.next()
    };
    found.map(|(i, _)| i).unwrap_or_else(|| panic!("no {phase} event"))
}

#[tokio::test]
async fn three_targets_pass_every_barrier_together() {
    let agents = [
        spawn_recording_agent().await,
        spawn_recording_agent().await,
        spawn_recording_agent().await,
    ];
    let targets = ["mme", "hss", "spgw"]
        .iter()
        .zip(&agents)
        .map(|(name, agent)| target(name, agent.addr.to_string()))
        .collect();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = Rollout::new(targets, config())
        .with_events(tx)
        .run(CancellationToken::new())
        .await;

    assert!(report.outcome.is_ok(), "{}", report.outcome);
    assert!(report.targets.iter().all(|t| t.phase == Phase::Started));

    let events = drain(&mut rx);
    assert!(position(&events, Phase::Connected, true) < position(&events, Phase::Configured, false));
    assert!(position(&events, Phase::Configured, true) < position(&events, Phase::Started, false));
    assert_eq!(events.iter().filter(|e| e.phase == Phase::Closed).count(), 3);

    for (name, agent) in ["mme", "hss", "spgw"].iter().zip(&agents) {
        let seen = agent.wait_for_messages(2).await;
        assert_eq!(seen[0].get("role"), Some(&json!(name)));
        assert_eq!(seen[1], msg(json!({"command": "start"})));
    }

    for agent in agents {
        agent.shutdown().await;
    }
}

#[tokio::test]
async fn refused_target_aborts_before_configuration() {
    let first = spawn_recording_agent().await;
    let third = spawn_recording_agent().await;
    let targets = vec![
        target("mme", first.addr.to_string()),
        target("hss", refused_addr()),
        target("spgw", third.addr.to_string()),
    ];

    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = Rollout::new(targets, config())
        .with_events(tx)
        .run(CancellationToken::new())
        .await;

    assert!(report.is_failed());
    let phases: Vec<Phase> = report.targets.iter().map(|t| t.phase).collect();
    assert_eq!(phases, vec![Phase::Connected, Phase::Failed, Phase::Connected]);
    assert_eq!(report.target("mme").unwrap().outcome.status, vmctl_core::Status::Warning);

    let events = drain(&mut rx);
    assert!(events.iter().all(|e| e.phase != Phase::Configured));
    assert!(events.iter().all(|e| e.phase != Phase::Started));

    // Nothing was sent to the healthy agents.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(first.processor.messages().is_empty());
    assert!(third.processor.messages().is_empty());

    first.shutdown().await;
    third.shutdown().await;
}

#[tokio::test]
async fn report_names_every_target() {
    let agent = spawn_recording_agent().await;
    let targets = vec![
        target("mme", agent.addr.to_string()),
        target("hss", refused_addr()),
    ];

    let report = Rollout::new(targets, config())
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.outcome.detail("mme"), Some("stopped at connected"));
    assert!(report.outcome.detail("hss").unwrap().contains("failed to connect"));
    assert!(report.outcome.message.starts_with("mme: "));

    agent.shutdown().await;
}
