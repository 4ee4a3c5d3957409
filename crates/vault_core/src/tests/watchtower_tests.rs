use std::sync::Mutex;

use super::*;
use crate::{
    simulated::SimulatedChain,
    test_support::{artifact, BENEFICIARY, MASTER, SECONDARY},
    VaultBackend,
};
use shared::protocol::CreationArgs;

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<ExpiryAlert>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &ExpiryAlert) -> Result<()> {
        self.alerts.lock().expect("alerts").push(alert.clone());
        Ok(())
    }
}

async fn watched_vault(chain: &SimulatedChain) -> VaultHandle {
    let args = CreationArgs {
        secondary_key: SECONDARY,
        master_key: MASTER,
        beneficiary: BENEFICIARY,
        secret_password: "p1".into(),
        withdrawal_password: "p2".into(),
    };
    let pending = chain
        .submit_creation(MASTER, &artifact(), &args)
        .await
        .expect("create");
    let address = chain.await_creation(&pending).await.expect("created");
    VaultHandle::new(address, Arc::new(chain.clone()))
}

#[test]
fn remaining_seconds_counts_down_past_zero() {
    assert_eq!(remaining_seconds(1_000, 300, 1_000), 300);
    assert_eq!(remaining_seconds(1_000, 300, 1_300), 0);
    assert_eq!(remaining_seconds(1_000, 300, 1_400), -100);
}

#[test]
fn placeholder_emails_count_as_missing() {
    assert_eq!(
        resolve_beneficiary_email(Some("heir@example.com"), None, Some("b@x.com")),
        Some("b@x.com".to_string())
    );
    assert_eq!(
        resolve_beneficiary_email(Some(" cli@x.com "), Some("env@x.com"), None),
        Some("cli@x.com".to_string())
    );
    assert_eq!(resolve_beneficiary_email(None, Some(""), None), None);
}

#[test]
fn missing_settings_are_listed_together() {
    let settings = Settings {
        rpc_url: Some("http://localhost:8545".into()),
        ..Settings::default()
    };
    assert_eq!(
        missing_settings(&settings),
        vec!["CONTRACT_ADDRESS", "WEBHOOK_URL"]
    );
}

#[tokio::test]
async fn waits_while_the_owner_is_active() {
    let chain = SimulatedChain::default();
    let handle = watched_vault(&chain).await;
    let notifier = Arc::new(RecordingNotifier::default());
    let tower = Watchtower::new(handle, "b@x.com", 300, Duration::from_secs(10), notifier.clone());

    let outcome = tower.check_at(chain.now() + 100).await.expect("check");

    assert_eq!(outcome, WatchOutcome::Waiting { remaining_secs: 200 });
    assert!(notifier.alerts.lock().expect("alerts").is_empty());
}

#[tokio::test]
async fn alerts_once_the_timer_lapses() {
    let chain = SimulatedChain::default();
    let handle = watched_vault(&chain).await;
    let vault = handle.address();
    let notifier = Arc::new(RecordingNotifier::default());
    let tower = Watchtower::new(handle, "b@x.com", 300, Duration::from_millis(5), notifier.clone());
    chain.advance_time(301);

    let clock = chain.clone();
    tower
        .run_with_clock(move || clock.now())
        .await
        .expect("run ends after alert");

    let alerts = notifier.alerts.lock().expect("alerts");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].vault, vault);
    assert_eq!(alerts[0].beneficiary_email, "b@x.com");
    assert!(alerts[0].body().contains("300 seconds"));
}

#[tokio::test]
async fn read_failures_surface_from_a_single_check() {
    let chain = SimulatedChain::default();
    let handle = watched_vault(&chain).await;
    chain.fail_reads(shared::domain::VaultField::LastActive, true);
    let tower = Watchtower::new(
        handle,
        "b@x.com",
        300,
        Duration::from_secs(10),
        Arc::new(LogNotifier),
    );

    assert!(tower.check_at(chain.now()).await.is_err());
}

#[tokio::test]
async fn refuses_to_run_without_a_beneficiary_email() {
    let chain = SimulatedChain::default();
    let handle = watched_vault(&chain).await;
    let tower = Watchtower::new(
        handle,
        "heir@example.com",
        300,
        Duration::from_millis(5),
        Arc::new(LogNotifier),
    );

    assert!(tower.run_with_clock(|| 0).await.is_err());
}
