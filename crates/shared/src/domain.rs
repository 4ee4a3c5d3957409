use std::str::FromStr;

use alloy_primitives::{utils::format_ether, Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chain id of Sepolia, the network the vault contract is deployed on.
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    #[default]
    Deploy,
    Dashboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultTopic {
    FundsSecured,
    Withdrawal,
    ReleaseToBeneficiary,
    ExtensionOfTime,
}

impl VaultTopic {
    pub const ALL: [VaultTopic; 4] = [
        VaultTopic::FundsSecured,
        VaultTopic::Withdrawal,
        VaultTopic::ReleaseToBeneficiary,
        VaultTopic::ExtensionOfTime,
    ];

    /// Event name as declared by the vault contract.
    pub fn event_name(self) -> &'static str {
        match self {
            VaultTopic::FundsSecured => "moneysecured",
            VaultTopic::Withdrawal => "withdraw",
            VaultTopic::ReleaseToBeneficiary => "releasemoney",
            VaultTopic::ExtensionOfTime => "extratime",
        }
    }

    /// Canonical event signature; hashed into the first log topic.
    pub fn event_signature(self) -> &'static str {
        match self {
            VaultTopic::FundsSecured => "moneysecured(address,uint256)",
            VaultTopic::Withdrawal => "withdraw(address,uint256)",
            VaultTopic::ReleaseToBeneficiary => "releasemoney(address,uint256)",
            VaultTopic::ExtensionOfTime => "extratime(string)",
        }
    }
}

/// Which vault read produced a value. Used for logging and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultField {
    Balance,
    LastActive,
    MasterKey,
    SecondaryKey,
}

/// Local mirror of the remote vault. Always replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub balance: U256,
    pub last_active: u64,
    pub is_active: bool,
    pub master_key: Option<Address>,
    pub secondary_key: Option<Address>,
}

impl VaultSnapshot {
    pub fn balance_ether(&self) -> String {
        format_ether(self.balance)
    }

    pub fn has_funds(&self) -> bool {
        !self.balance.is_zero()
    }

    /// `None` when either key is unknown, otherwise whether `account` holds one of them.
    pub fn is_key_holder(&self, account: Address) -> Option<bool> {
        let master = self.master_key?;
        let secondary = self.secondary_key?;
        Some(account == master || account == secondary)
    }
}

/// Raw form input for creating a vault.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentParameters {
    pub secondary_key: String,
    pub master_key: String,
    pub beneficiary: String,
    /// Kept locally only; never sent to the vault service.
    pub beneficiary_email: String,
    pub secret_password: String,
    pub withdrawal_password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("expected 40 hex characters with an optional 0x prefix")]
    Malformed,
    #[error("mixed-case address fails its checksum")]
    BadChecksum,
}

/// Parses an account identifier the way wallets do: optional `0x`, 40 hex
/// digits, and a valid EIP-55 checksum when the input mixes cases.
pub fn parse_account(raw: &str) -> Result<Address, AddressError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if body.len() != 40 || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AddressError::Malformed);
    }

    let address = Address::from_str(&format!("0x{body}")).map_err(|_| AddressError::Malformed)?;

    let has_upper = body.bytes().any(|b| b.is_ascii_uppercase());
    let has_lower = body.bytes().any(|b| b.is_ascii_lowercase());
    if has_upper && has_lower {
        let checksummed = address.to_checksum(None);
        if checksummed.trim_start_matches("0x") != body {
            return Err(AddressError::BadChecksum);
        }
    }

    Ok(address)
}
