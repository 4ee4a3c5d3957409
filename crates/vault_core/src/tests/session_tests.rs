use std::time::Duration;

use shared::{error::ErrorCategory, U256};

use super::*;
use crate::{
    simulated::{SimulatedChain, DEFAULT_TIMEOUT_SECS},
    test_support::{
        artifact, deployed, ether, harness, harness_for, harness_with_config, vault_parameters,
        BENEFICIARY, OWNER,
    },
    ControllerConfig, VaultBackend, WalletProvider,
};

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn dashboard_session_owns_listeners_and_a_poller() {
    let h = harness().await;
    let vault = deployed(&h).await;

    assert_eq!(
        h.controller.session_status().await,
        Some((vault, VaultTopic::ALL.len() + 1))
    );
    assert_eq!(h.chain.active_subscriptions(vault), VaultTopic::ALL.len());
}

#[tokio::test]
async fn switching_vaults_releases_every_subscription_to_the_old_one() {
    let h = harness().await;
    let first = deployed(&h).await;
    let second = deployed(&h).await;
    assert_ne!(first, second);

    assert_eq!(h.chain.active_subscriptions(first), 0);
    assert_eq!(h.chain.active_subscriptions(second), VaultTopic::ALL.len());
    assert_eq!(
        h.controller.session_status().await.map(|(vault, _)| vault),
        Some(second)
    );
}

#[tokio::test]
async fn switching_vaults_resets_the_snapshot() {
    let h = harness().await;
    let first = deployed(&h).await;
    h.seed_vault(OWNER, first, 1).await;
    let mut events = h.controller.subscribe_events();

    let second = deployed(&h).await;

    assert_eq!(h.controller.snapshot().await.balance, U256::ZERO);
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&ControllerEvent::SnapshotUpdated(VaultSnapshot::default())));
    assert_eq!(h.controller.vault_address().await, Some(second));
}

#[tokio::test]
async fn leaving_the_dashboard_tears_the_session_down_but_keeps_the_vault() {
    let h = harness().await;
    let vault = deployed(&h).await;

    h.controller.leave_dashboard().await;

    assert_eq!(h.controller.view().await, View::Deploy);
    assert_eq!(h.controller.vault_address().await, Some(vault));
    assert_eq!(h.controller.session_status().await, None);
    assert_eq!(h.chain.active_subscriptions(vault), 0);

    h.controller.open_dashboard().await.expect("reopen");
    assert_eq!(h.controller.view().await, View::Dashboard);
    assert_eq!(h.chain.active_subscriptions(vault), VaultTopic::ALL.len());
}

#[tokio::test]
async fn open_dashboard_without_a_vault_fails() {
    let h = harness().await;
    assert_eq!(
        h.controller.open_dashboard().await,
        Err(VaultError::NoVault)
    );
}

#[tokio::test]
async fn failed_subscription_leaves_no_session() {
    let h = harness().await;
    h.backend.fail_subscriptions(true);

    let vault = h
        .controller
        .deploy(vault_parameters())
        .await
        .expect("vault is created even when the session cannot start")
        .address();

    assert_eq!(h.controller.session_status().await, None);
    assert_eq!(h.chain.active_subscriptions(vault), 0);
    assert_eq!(
        h.controller.command_state().last_error.map(|e| e.category),
        Some(ErrorCategory::Connection)
    );
}

#[tokio::test]
async fn initial_refresh_runs_when_the_session_opens() {
    let h = harness().await;
    let reads = h.backend.balance_reads();

    deployed(&h).await;

    assert_eq!(h.backend.balance_reads(), reads + 1);
    assert!(h.controller.snapshot().await.is_active);
}

#[tokio::test]
async fn poller_refreshes_on_its_interval() {
    let chain = SimulatedChain::default();
    let wallet: std::sync::Arc<dyn WalletProvider> = std::sync::Arc::new(chain.wallet(OWNER));
    let config = ControllerConfig {
        poll_interval: Duration::from_millis(20),
        ..ControllerConfig::default()
    };
    let h = harness_with_config(chain, Some(wallet), Some(artifact()), config).await;
    deployed(&h).await;
    let reads = h.backend.balance_reads();

    eventually(|| h.backend.balance_reads() >= reads + 3).await;
}

#[tokio::test]
async fn remote_notifications_refresh_the_snapshot() {
    let h = harness().await;
    let vault = deployed(&h).await;
    h.chain.fund(OWNER, ether(3));

    // Deposit made outside the controller, e.g. from another client.
    let pending = h
        .chain
        .submit(
            OWNER,
            vault,
            &shared::protocol::VaultCall::SecureMoney { value: ether(3) },
        )
        .await
        .expect("submit");
    h.chain.await_finality(&pending).await.expect("final");

    let controller = h.controller.clone();
    tokio::time::timeout(Duration::from_secs(2), async move {
        while controller.snapshot().await.balance != ether(3) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("snapshot refreshed by listener");
}

#[tokio::test]
async fn beneficiary_release_raises_one_acknowledgment() {
    let mut h = harness_for(BENEFICIARY).await;
    let vault = deployed(&h).await;
    h.seed_vault(BENEFICIARY, vault, 1).await;
    h.chain.advance_time(DEFAULT_TIMEOUT_SECS + 1);
    h.drain_events();

    h.controller.claim_beneficiary("p1").await.expect("claim");

    let mut acknowledged = false;
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match h.events.recv().await {
                Ok(ControllerEvent::Acknowledgment(text)) => {
                    assert_eq!(text, "Beneficiary has claimed the funds!");
                    acknowledged = true;
                    break;
                }
                Ok(_) => continue,
                Err(err) => panic!("event stream closed: {err}"),
            }
        }
    })
    .await
    .expect("acknowledgment");
    assert!(acknowledged);
}
