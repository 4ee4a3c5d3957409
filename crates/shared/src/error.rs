use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Connection,
    UnsupportedNetwork,
    Validation,
    SelfReference,
    Configuration,
    Deployment,
    Read,
    InsufficientFunds,
    InvalidPasswordOrUnauthorized,
    ZeroBalance,
    StillActive,
    CommandInFlight,
    NoVault,
    Unclassified,
}

/// A failure as shown to the user: a category plus a readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct UserFacingError {
    pub category: ErrorCategory,
    pub message: String,
}

impl UserFacingError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}
