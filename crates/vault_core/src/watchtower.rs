//! Off-line monitor that alerts the beneficiary once a vault's timer lapses.

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use shared::{protocol::RemoteFailure, Address};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::{config::Settings, VaultHandle};

const PLACEHOLDER_DOMAIN: &str = "example.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryAlert {
    pub vault: Address,
    pub beneficiary_email: String,
    pub last_active: u64,
    pub timeout_secs: u64,
}

impl ExpiryAlert {
    pub fn subject(&self) -> String {
        format!("Vault {} is ready to be claimed", self.vault)
    }

    pub fn body(&self) -> String {
        format!(
            "The owner of vault {} has not checked in for more than {} seconds \
             (last activity at {}). You can now claim the funds with your secret password.",
            self.vault, self.timeout_secs, self.last_active
        )
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &ExpiryAlert) -> Result<()>;
}

/// Writes the alert to the log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &ExpiryAlert) -> Result<()> {
        warn!(
            vault = %alert.vault,
            to = %alert.beneficiary_email,
            subject = %alert.subject(),
            "watchtower: beneficiary alert"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Waiting { remaining_secs: i64 },
    Notified,
}

/// Seconds until the timer lapses; zero or negative once it has.
pub fn remaining_seconds(last_active: u64, timeout_secs: u64, now: u64) -> i64 {
    let deadline = i128::from(last_active) + i128::from(timeout_secs);
    let remaining = deadline - i128::from(now);
    remaining.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

pub fn is_placeholder_email(email: &str) -> bool {
    let email = email.trim();
    email.is_empty() || email.contains(PLACEHOLDER_DOMAIN)
}

/// First usable email among the command line, the settings and the persisted slot.
pub fn resolve_beneficiary_email(
    cli: Option<&str>,
    settings: Option<&str>,
    stored: Option<&str>,
) -> Option<String> {
    [cli, settings, stored]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|candidate| !is_placeholder_email(candidate))
        .map(str::to_string)
}

/// Names of the settings the watchtower cannot run without.
pub fn missing_settings(settings: &Settings) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if settings.rpc_url.as_deref().map_or(true, |v| v.trim().is_empty()) {
        missing.push("RPC_URL");
    }
    if settings
        .contract_address
        .as_deref()
        .map_or(true, |v| v.trim().is_empty())
    {
        missing.push("CONTRACT_ADDRESS");
    }
    if settings
        .webhook_url
        .as_deref()
        .map_or(true, |v| v.trim().is_empty())
    {
        missing.push("WEBHOOK_URL");
    }
    missing
}

pub struct Watchtower {
    handle: VaultHandle,
    beneficiary_email: String,
    timeout_secs: u64,
    poll_interval: Duration,
    notifier: Arc<dyn Notifier>,
}

impl Watchtower {
    pub fn new(
        handle: VaultHandle,
        beneficiary_email: impl Into<String>,
        timeout_secs: u64,
        poll_interval: Duration,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            handle,
            beneficiary_email: beneficiary_email.into(),
            timeout_secs,
            poll_interval,
            notifier,
        }
    }

    /// One poll: read the last check-in and alert if the timer has lapsed at `now`.
    pub async fn check_at(&self, now: u64) -> Result<WatchOutcome> {
        let last_active = self
            .handle
            .last_active()
            .await
            .map_err(|failure: RemoteFailure| anyhow::anyhow!("lastactive read failed: {failure}"))?;
        let remaining_secs = remaining_seconds(last_active, self.timeout_secs, now);
        info!(
            vault = %self.handle.address(),
            last_active,
            remaining_secs,
            "watchtower: checked vault"
        );
        if remaining_secs > 0 {
            return Ok(WatchOutcome::Waiting { remaining_secs });
        }

        let alert = ExpiryAlert {
            vault: self.handle.address(),
            beneficiary_email: self.beneficiary_email.clone(),
            last_active,
            timeout_secs: self.timeout_secs,
        };
        self.notifier.notify(&alert).await?;
        info!(to = %alert.beneficiary_email, "watchtower: beneficiary notified");
        Ok(WatchOutcome::Notified)
    }

    pub async fn run(&self) -> Result<()> {
        self.run_with_clock(|| u64::try_from(Utc::now().timestamp()).unwrap_or_default())
            .await
    }

    /// Polls until one alert has been delivered. Failed reads and failed
    /// deliveries are logged and retried on the next tick.
    pub async fn run_with_clock(&self, clock: impl Fn() -> u64) -> Result<()> {
        if is_placeholder_email(&self.beneficiary_email) {
            bail!("no beneficiary email configured");
        }
        let mut ticks = interval(self.poll_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            vault = %self.handle.address(),
            timeout_secs = self.timeout_secs,
            "watchtower: monitoring started"
        );
        loop {
            ticks.tick().await;
            match self.check_at(clock()).await {
                Ok(WatchOutcome::Notified) => return Ok(()),
                Ok(WatchOutcome::Waiting { .. }) => {}
                Err(err) => error!(error = %err, "watchtower: check failed"),
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/watchtower_tests.rs"]
mod tests;
