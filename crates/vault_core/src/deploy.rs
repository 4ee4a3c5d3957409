use std::{fs, path::Path, sync::Arc};

use anyhow::{anyhow, Context, Result};
use shared::{
    domain::{parse_account, DeploymentParameters, View},
    protocol::CreationArgs,
    Address,
};
use tracing::{info, warn};

use crate::{VaultController, VaultError, VaultHandle};

/// Compiled vault contract: creation bytecode for the fixed vault interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentArtifact {
    bytecode: Vec<u8>,
}

impl DeploymentArtifact {
    pub fn new(bytecode: Vec<u8>) -> Self {
        Self { bytecode }
    }

    /// Parses hex bytecode, with or without a `0x` prefix.
    pub fn from_hex(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if !digits.is_ascii() || digits.len() % 2 != 0 {
            return Err(anyhow!("bytecode must be an even number of hex digits"));
        }
        let bytecode = (0..digits.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&digits[i..i + 2], 16))
            .collect::<std::result::Result<Vec<u8>, _>>()
            .context("bytecode is not valid hex")?;
        Ok(Self { bytecode })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read vault artifact '{}'", path.display()))?;
        Self::from_hex(&raw)
            .with_context(|| format!("invalid vault artifact '{}'", path.display()))
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }
}

fn parse_field(label: &str, raw: &str) -> Result<Address, VaultError> {
    parse_account(raw)
        .map_err(|err| VaultError::Validation(format!("Invalid {label} address '{raw}': {err}")))
}

/// Validates the on-chain part of the form. The email never leaves the client.
pub fn creation_args(params: &DeploymentParameters) -> Result<CreationArgs, VaultError> {
    Ok(CreationArgs {
        secondary_key: parse_field("secondary key", &params.secondary_key)?,
        master_key: parse_field("master key", &params.master_key)?,
        beneficiary: parse_field("beneficiary", &params.beneficiary)?,
        secret_password: params.secret_password.clone(),
        withdrawal_password: params.withdrawal_password.clone(),
    })
}

impl VaultController {
    /// Creates a new vault and opens its dashboard once the creation is final.
    pub async fn deploy(
        self: &Arc<Self>,
        params: DeploymentParameters,
    ) -> Result<VaultHandle, VaultError> {
        self.clear_error();
        let result = self.deploy_vault(params).await;
        if let Err(err) = &result {
            self.report_error(err);
        }
        result
    }

    async fn deploy_vault(
        self: &Arc<Self>,
        params: DeploymentParameters,
    ) -> Result<VaultHandle, VaultError> {
        let identity = self.ensure_identity().await?;
        let artifact = self
            .artifact
            .as_ref()
            .filter(|artifact| !artifact.is_empty())
            .ok_or_else(|| {
                VaultError::Configuration(
                    "Vault bytecode is missing; configure VAULT_ARTIFACT.".to_string(),
                )
            })?;

        if let Err(err) = self.set_beneficiary_email(&params.beneficiary_email).await {
            warn!(error = %err, "deploy: beneficiary email not persisted");
        }
        let args = creation_args(&params)?;

        info!(
            from = %identity.address(),
            secondary_key = %args.secondary_key,
            master_key = %args.master_key,
            beneficiary = %args.beneficiary,
            "deploy: submitting vault creation"
        );
        let pending = self
            .backend
            .submit_creation(identity.address(), artifact, &args)
            .await
            .map_err(|failure| VaultError::Deployment(failure.reason_or_message().to_string()))?;
        let address = self
            .backend
            .await_creation(&pending)
            .await
            .map_err(|failure| VaultError::Deployment(failure.reason_or_message().to_string()))?;
        info!(vault = %address, operation = %pending.id, "deploy: vault created");

        let handle = VaultHandle::new(address, Arc::clone(&self.backend));
        // A session that fails to start reports itself; the vault exists regardless.
        let _ = self.set_scope(View::Dashboard, Some(handle.clone())).await;
        Ok(handle)
    }

    /// Binds to an existing vault by address. No network round trip is made
    /// here; a bogus address shows up as soft read failures later.
    pub async fn attach(self: &Arc<Self>, address: &str) -> Result<VaultHandle, VaultError> {
        self.clear_error();
        let result = self.attach_vault(address).await;
        if let Err(err) = &result {
            self.report_error(err);
        }
        result
    }

    async fn attach_vault(self: &Arc<Self>, raw: &str) -> Result<VaultHandle, VaultError> {
        let identity = self.ensure_identity().await?;
        let address = parse_account(raw)
            .map_err(|err| VaultError::Validation(format!("Invalid vault address: {err}")))?;
        if address == identity.address() {
            return Err(VaultError::SelfReference);
        }

        info!(vault = %address, "deploy: attaching to existing vault");
        let handle = VaultHandle::new(address, Arc::clone(&self.backend));
        let _ = self.set_scope(View::Dashboard, Some(handle.clone())).await;
        Ok(handle)
    }
}

#[cfg(test)]
#[path = "tests/deploy_tests.rs"]
mod tests;
