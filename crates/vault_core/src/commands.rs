use alloy_primitives::utils::parse_ether;
use serde::{Deserialize, Serialize};
use shared::{error::UserFacingError, protocol::VaultCall, U256};
use tracing::{info, warn};

use crate::{
    error::{reports_still_active, still_active},
    lock_std, ControllerEvent, Identity, VaultController, VaultError, VaultHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Ping,
    Deposit,
    WithdrawOwner,
    ClaimBeneficiary,
}

impl CommandKind {
    fn label(self) -> &'static str {
        match self {
            CommandKind::Ping => "Ping",
            CommandKind::Deposit => "Deposit",
            CommandKind::WithdrawOwner => "Withdraw",
            CommandKind::ClaimBeneficiary => "Claim",
        }
    }

    /// Withdraw and claim failures also raise a blocking acknowledgment.
    fn acknowledges_failure(self) -> bool {
        matches!(self, CommandKind::WithdrawOwner | CommandKind::ClaimBeneficiary)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandState {
    pub in_flight: Option<CommandKind>,
    pub last_error: Option<UserFacingError>,
}

impl CommandState {
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }
}

/// Holds the single in-flight slot; releasing happens on drop so every exit
/// path frees it.
struct InFlight<'a> {
    controller: &'a VaultController,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let state = {
            let mut guard = self.controller.command_guard();
            guard.in_flight = None;
            guard.clone()
        };
        self.controller
            .emit(ControllerEvent::CommandStateChanged(state));
    }
}

fn parse_deposit_amount(raw: &str) -> Result<U256, VaultError> {
    let invalid = || {
        VaultError::Validation(format!(
            "Deposit amount '{raw}' is not a positive decimal amount of ether."
        ))
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with(['-', '+']) {
        return Err(invalid());
    }
    let value = parse_ether(trimmed).map_err(|_| invalid())?;
    if value.is_zero() {
        return Err(invalid());
    }
    Ok(value)
}

impl VaultController {
    fn begin_command(&self, kind: CommandKind) -> Result<InFlight<'_>, VaultError> {
        let state = {
            let mut guard = self.command_guard();
            if let Some(current) = guard.in_flight {
                warn!(requested = ?kind, ?current, "command: rejected while another is in flight");
                return Err(VaultError::CommandInFlight);
            }
            guard.in_flight = Some(kind);
            guard.last_error = None;
            guard.clone()
        };
        self.emit(ControllerEvent::CommandStateChanged(state));
        Ok(InFlight { controller: self })
    }

    fn finish_command(
        &self,
        kind: CommandKind,
        slot: InFlight<'_>,
        result: Result<(), VaultError>,
    ) -> Result<(), VaultError> {
        match &result {
            Ok(()) => info!(command = ?kind, "command: completed"),
            Err(err) => {
                warn!(command = ?kind, error = %err, "command: failed");
                self.report_error(err);
                if kind.acknowledges_failure() {
                    self.emit(ControllerEvent::Acknowledgment(err.to_string()));
                }
            }
        }
        drop(slot);
        result
    }

    async fn command_context(&self) -> Result<(Identity, VaultHandle), VaultError> {
        let handle = self.vault_handle().await.ok_or(VaultError::NoVault)?;
        let identity = self.identity().await.ok_or(VaultError::NotConnected)?;
        Ok((identity, handle))
    }

    /// Submits `call` and waits for it to become final.
    async fn invoke(
        &self,
        identity: Identity,
        handle: &VaultHandle,
        call: VaultCall,
    ) -> Result<(), shared::protocol::RemoteFailure> {
        info!(
            vault = %handle.address(),
            from = %identity.address(),
            call = call.name(),
            value = %call.value(),
            "command: submitting"
        );
        let pending = handle.submit(identity.address(), &call).await?;
        info!(operation = %pending.id, call = call.name(), "command: awaiting finality");
        handle.await_finality(&pending).await
    }

    async fn refresh_after_command(&self) {
        if let Err(err) = self.refresh().await {
            warn!(error = %err, "command: post-command refresh failed");
        }
    }

    /// Extends or refreshes the liveness timer.
    pub async fn ping(&self, extension_seconds: u64) -> Result<(), VaultError> {
        let slot = self.begin_command(CommandKind::Ping)?;
        let result = self.run_ping(extension_seconds).await;
        self.finish_command(CommandKind::Ping, slot, result)
    }

    async fn run_ping(&self, extension_seconds: u64) -> Result<(), VaultError> {
        let (identity, handle) = self.command_context().await?;
        self.invoke(identity, &handle, VaultCall::Ping { extension_seconds })
            .await
            .map_err(|failure| VaultError::remote(CommandKind::Ping.label(), &failure))?;
        self.refresh_after_command().await;
        Ok(())
    }

    /// Sends `amount` ether into the vault and clears the deposit draft.
    pub async fn deposit(&self, amount: &str) -> Result<(), VaultError> {
        let slot = self.begin_command(CommandKind::Deposit)?;
        let result = self.run_deposit(amount).await;
        self.finish_command(CommandKind::Deposit, slot, result)
    }

    async fn run_deposit(&self, amount: &str) -> Result<(), VaultError> {
        let value = parse_deposit_amount(amount)?;
        let (identity, handle) = self.command_context().await?;
        self.invoke(identity, &handle, VaultCall::SecureMoney { value })
            .await
            .map_err(|failure| VaultError::remote(CommandKind::Deposit.label(), &failure))?;
        lock_std(&self.deposit_draft).clear();
        self.refresh_after_command().await;
        Ok(())
    }

    /// Owner withdrawal. Fails locally, before any remote call, when the
    /// mirrored balance is zero.
    pub async fn withdraw_owner(&self, password: &str) -> Result<(), VaultError> {
        let slot = self.begin_command(CommandKind::WithdrawOwner)?;
        let result = self.run_withdraw(password).await;
        self.finish_command(CommandKind::WithdrawOwner, slot, result)
    }

    async fn run_withdraw(&self, password: &str) -> Result<(), VaultError> {
        let (identity, handle) = self.command_context().await?;
        let snapshot = self.snapshot().await;
        if !snapshot.has_funds() {
            return Err(VaultError::InsufficientFunds);
        }

        if snapshot.is_key_holder(identity.address()) == Some(false) {
            warn!(account = %identity.address(), "command: wallet is neither master nor secondary key");
            self.emit(ControllerEvent::Warning(
                "Connected wallet is neither the Master nor the Secondary Key; the vault will likely refuse the withdrawal."
                    .to_string(),
            ));
        }

        self.invoke(
            identity,
            &handle,
            VaultCall::WithdrawMoneyOwner {
                password: password.to_string(),
            },
        )
        .await
        .map_err(|failure| VaultError::remote(CommandKind::WithdrawOwner.label(), &failure))?;

        self.refresh_after_command().await;
        self.emit(ControllerEvent::Acknowledgment(
            "Withdrawal Successful!".to_string(),
        ));
        Ok(())
    }

    /// Beneficiary claim, accepted by the vault only after the owner went quiet.
    pub async fn claim_beneficiary(&self, password: &str) -> Result<(), VaultError> {
        let slot = self.begin_command(CommandKind::ClaimBeneficiary)?;
        let result = self.run_claim(password).await;
        self.finish_command(CommandKind::ClaimBeneficiary, slot, result)
    }

    async fn run_claim(&self, password: &str) -> Result<(), VaultError> {
        let (identity, handle) = self.command_context().await?;
        self.invoke(
            identity,
            &handle,
            VaultCall::UserDied {
                password: password.to_string(),
            },
        )
        .await
        .map_err(|failure| {
            if reports_still_active(&failure) {
                VaultError::Remote {
                    operation: CommandKind::ClaimBeneficiary.label(),
                    failure: still_active(),
                }
            } else {
                VaultError::remote(CommandKind::ClaimBeneficiary.label(), &failure)
            }
        })?;
        self.refresh_after_command().await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
