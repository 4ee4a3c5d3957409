use shared::Address;
use tracing::{info, warn};

use crate::{ControllerEvent, VaultController, VaultError, WalletError};

/// The signing account the wallet provider handed out for this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    address: Address,
}

impl Identity {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

impl VaultController {
    /// Binds a signing identity, asking the wallet to move to the required
    /// network first. An unknown network is a hard failure; any other switch
    /// failure only leaves a warning.
    pub async fn connect(&self) -> Result<Identity, VaultError> {
        let result = self.bind_identity().await;
        match &result {
            Ok(_) => self.clear_error(),
            Err(err) => self.report_error(err),
        }
        result
    }

    pub(crate) async fn bind_identity(&self) -> Result<Identity, VaultError> {
        let wallet = self.wallet.as_ref().ok_or(VaultError::NoProvider)?;
        let chain_id = self.config.required_chain_id;

        match wallet.switch_network(chain_id).await {
            Ok(()) => info!(chain_id, "identity: wallet on required network"),
            Err(WalletError::UnknownNetwork { .. }) => {
                warn!(chain_id, "identity: required network unknown to wallet");
                return Err(VaultError::UnsupportedNetwork { chain_id });
            }
            Err(err) => {
                warn!(chain_id, error = %err, "identity: could not switch network; continuing");
                self.emit(ControllerEvent::Warning(format!(
                    "Could not switch the wallet to network {chain_id:#x}: {err}"
                )));
            }
        }

        let address = wallet
            .request_account()
            .await
            .map_err(|err| VaultError::Connection(err.to_string()))?;
        let identity = Identity::new(address);

        *self.identity.write().await = Some(identity);
        info!(account = %address, "identity: wallet connected");
        self.emit(ControllerEvent::IdentityChanged(Some(address)));
        Ok(identity)
    }

    /// Current identity, connecting first when none is bound yet.
    pub(crate) async fn ensure_identity(&self) -> Result<Identity, VaultError> {
        if let Some(identity) = self.identity().await {
            return Ok(identity);
        }
        info!("identity: no wallet bound; connecting before continuing");
        self.bind_identity().await
    }

    /// Drops the session, the vault handle and the identity.
    pub async fn disconnect(&self) {
        self.teardown_scope().await;
        *self.identity.write().await = None;
        info!("identity: wallet disconnected");
        self.emit(ControllerEvent::IdentityChanged(None));
    }
}

#[cfg(test)]
#[path = "tests/identity_tests.rs"]
mod tests;
