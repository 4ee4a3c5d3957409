use shared::{
    error::{ErrorCategory, UserFacingError},
    protocol::RemoteFailure,
};
use thiserror::Error;

/// Revert phrase for a wrong password or a caller that is not a key holder.
pub const INVALID_PASSWORD_PHRASE: &str = "Hell NOOOO";
/// Revert phrase for an empty vault.
pub const NO_MONEY_PHRASE: &str = "No money left";
/// Revert phrase for a claim while the owner is still inside the active window.
pub const STILL_ACTIVE_PHRASE: &str = "The person is active";

const GENERIC_FAILURE: &str = "Unknown error";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error("No crypto wallet found. Install or configure a wallet provider.")]
    NoProvider,
    #[error("Wallet is not connected.")]
    NotConnected,
    #[error("Wallet connection failed: {0}")]
    Connection(String),
    #[error("Network {chain_id:#x} is not configured in the wallet; add it manually.")]
    UnsupportedNetwork { chain_id: u64 },
    #[error("{0}")]
    Validation(String),
    #[error("You cannot load your own wallet address as the vault!")]
    SelfReference,
    #[error("{0}")]
    Configuration(String),
    #[error("Deployment failed: {0}")]
    Deployment(String),
    #[error("Vault read failed: {0}")]
    Read(String),
    #[error("Balance is 0. The vault has no money to withdraw! Did you deposit?")]
    InsufficientFunds,
    #[error("Another vault command is still in flight.")]
    CommandInFlight,
    #[error("No vault is loaded.")]
    NoVault,
    #[error("Could not subscribe to vault notifications: {0}")]
    Subscription(String),
    #[error("Could not persist local state: {0}")]
    LocalState(String),
    #[error("{operation} failed: {failure}")]
    Remote {
        operation: &'static str,
        failure: UserFacingError,
    },
}

impl VaultError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            VaultError::NoProvider
            | VaultError::NotConnected
            | VaultError::Connection(_)
            | VaultError::Subscription(_) => ErrorCategory::Connection,
            VaultError::UnsupportedNetwork { .. } => ErrorCategory::UnsupportedNetwork,
            VaultError::Validation(_) => ErrorCategory::Validation,
            VaultError::SelfReference => ErrorCategory::SelfReference,
            VaultError::Configuration(_) | VaultError::LocalState(_) => {
                ErrorCategory::Configuration
            }
            VaultError::Deployment(_) => ErrorCategory::Deployment,
            VaultError::Read(_) => ErrorCategory::Read,
            VaultError::InsufficientFunds => ErrorCategory::InsufficientFunds,
            VaultError::CommandInFlight => ErrorCategory::CommandInFlight,
            VaultError::NoVault => ErrorCategory::NoVault,
            VaultError::Remote { failure, .. } => failure.category,
        }
    }

    pub fn to_user_facing(&self) -> UserFacingError {
        UserFacingError::new(self.category(), self.to_string())
    }

    pub(crate) fn remote(operation: &'static str, failure: &RemoteFailure) -> Self {
        VaultError::Remote {
            operation,
            failure: translate(failure),
        }
    }
}

/// Picks the most specific text out of a raw failure: the nested provider
/// message, then the top-level reason, then the message itself.
pub fn raw_failure_text(failure: &RemoteFailure) -> &str {
    [
        failure.provider_message.as_deref(),
        failure.reason.as_deref(),
        Some(failure.message.as_str()),
    ]
    .into_iter()
    .flatten()
    .find(|text| !text.trim().is_empty())
    .unwrap_or(GENERIC_FAILURE)
}

/// Maps a raw text to a category when it carries a known revert phrase.
pub fn classify(text: &str) -> Option<UserFacingError> {
    if text.contains(INVALID_PASSWORD_PHRASE) {
        Some(UserFacingError::new(
            ErrorCategory::InvalidPasswordOrUnauthorized,
            "Invalid Password or Unauthorized Wallet.",
        ))
    } else if text.contains(NO_MONEY_PHRASE) {
        Some(UserFacingError::new(
            ErrorCategory::ZeroBalance,
            "Vault Balance is 0.",
        ))
    } else if text.contains(STILL_ACTIVE_PHRASE) {
        Some(still_active())
    } else {
        None
    }
}

/// Pure translation of a remote failure into what the user sees.
pub fn translate(failure: &RemoteFailure) -> UserFacingError {
    let text = raw_failure_text(failure);
    classify(text)
        .unwrap_or_else(|| UserFacingError::new(ErrorCategory::Unclassified, text.to_string()))
}

pub(crate) fn still_active() -> UserFacingError {
    UserFacingError::new(
        ErrorCategory::StillActive,
        "The Vault is still ACTIVE! You must wait for the timer to expire.",
    )
}

/// True when any layer of the failure says the owner is still active.
pub(crate) fn reports_still_active(failure: &RemoteFailure) -> bool {
    [
        failure.provider_message.as_deref(),
        failure.reason.as_deref(),
        Some(failure.message.as_str()),
    ]
    .into_iter()
    .flatten()
    .any(|text| text.contains(STILL_ACTIVE_PHRASE))
}

#[cfg(test)]
#[path = "tests/error_tests.rs"]
mod tests;
