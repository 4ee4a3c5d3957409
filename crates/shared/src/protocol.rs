use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::VaultTopic;

/// The five constructor arguments the vault contract takes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationArgs {
    pub secondary_key: Address,
    pub master_key: Address,
    pub beneficiary: Address,
    pub secret_password: String,
    pub withdrawal_password: String,
}

/// Mutating calls accepted by a deployed vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum VaultCall {
    Ping { extension_seconds: u64 },
    SecureMoney { value: U256 },
    WithdrawMoneyOwner { password: String },
    UserDied { password: String },
}

impl VaultCall {
    pub fn function_signature(&self) -> &'static str {
        match self {
            VaultCall::Ping { .. } => "ping(uint256)",
            VaultCall::SecureMoney { .. } => "securemoney()",
            VaultCall::WithdrawMoneyOwner { .. } => "withdrawmoneyowner(string)",
            VaultCall::UserDied { .. } => "userdied(string)",
        }
    }

    /// Value attached to the call; only deposits carry one.
    pub fn value(&self) -> U256 {
        match self {
            VaultCall::SecureMoney { value } => *value,
            _ => U256::ZERO,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VaultCall::Ping { .. } => "ping",
            VaultCall::SecureMoney { .. } => "securemoney",
            VaultCall::WithdrawMoneyOwner { .. } => "withdrawmoneyowner",
            VaultCall::UserDied { .. } => "userdied",
        }
    }
}

/// Token returned by a submission; awaited separately for finality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: String,
}

impl PendingOperation {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultNotification {
    pub topic: VaultTopic,
    pub vault: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Raw failure reported by the vault service or the node in front of it.
///
/// `reason` is the decoded revert reason when one is available and
/// `provider_message` the nested message of the provider-level error.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct RemoteFailure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message: Option<String>,
}

impl RemoteFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reason: None,
            provider_message: None,
        }
    }

    /// A contract revert carrying `reason`, the way nodes report one.
    pub fn revert(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            message: format!("execution reverted: {reason}"),
            reason: Some(reason),
            provider_message: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_provider_message(mut self, message: impl Into<String>) -> Self {
        self.provider_message = Some(message.into());
        self
    }

    /// Top-level reason when present, otherwise the message.
    pub fn reason_or_message(&self) -> &str {
        self.reason
            .as_deref()
            .filter(|reason| !reason.is_empty())
            .unwrap_or(&self.message)
    }
}
