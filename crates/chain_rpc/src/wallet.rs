use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use shared::Address;
use tracing::{info, warn};
use vault_core::{WalletError, WalletProvider};

use crate::client::{
    parse_quantity, quantity, RpcClient, RpcError, METHOD_NOT_FOUND_CODE, UNRECOGNIZED_CHAIN_CODE,
};

/// Wallet reached over JSON-RPC: an injected-provider bridge or a node with
/// unlocked accounts.
pub struct RpcWallet {
    client: Arc<RpcClient>,
}

impl RpcWallet {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self { client }
    }

    async fn accounts(&self, method: &str) -> Result<Vec<Address>, RpcError> {
        self.client.request(method, json!([])).await
    }

    async fn chain_id(&self) -> Result<u64, WalletError> {
        let raw: String = self
            .client
            .request("eth_chainId", json!([]))
            .await
            .map_err(|err| WalletError::Request(err.to_string()))?;
        let chain_id = parse_quantity("eth_chainId", &raw)
            .map_err(|err| WalletError::Request(err.to_string()))?;
        u64::try_from(chain_id).map_err(|_| WalletError::Request(format!("chain id {raw} overflows")))
    }
}

#[async_trait]
impl WalletProvider for RpcWallet {
    async fn request_account(&self) -> Result<Address, WalletError> {
        let accounts = match self.accounts("eth_requestAccounts").await {
            Ok(accounts) => accounts,
            Err(err) if err.code() == Some(METHOD_NOT_FOUND_CODE) => {
                info!("wallet: eth_requestAccounts unsupported; using eth_accounts");
                self.accounts("eth_accounts")
                    .await
                    .map_err(|err| WalletError::Request(err.to_string()))?
            }
            Err(err @ RpcError::Node { .. }) => return Err(WalletError::Rejected(err.to_string())),
            Err(err) => return Err(WalletError::Request(err.to_string())),
        };
        accounts.first().copied().ok_or(WalletError::NoAccounts)
    }

    async fn switch_network(&self, chain_id: u64) -> Result<(), WalletError> {
        let params = json!([{ "chainId": quantity(chain_id) }]);
        match self
            .client
            .request::<serde_json::Value>("wallet_switchEthereumChain", params)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.code() == Some(UNRECOGNIZED_CHAIN_CODE) => {
                Err(WalletError::UnknownNetwork { chain_id })
            }
            Err(err) if err.code() == Some(METHOD_NOT_FOUND_CODE) => {
                let current = self.chain_id().await?;
                if current == chain_id {
                    Ok(())
                } else {
                    warn!(current, required = chain_id, "wallet: node serves a different chain");
                    Err(WalletError::UnknownNetwork { chain_id })
                }
            }
            Err(err @ RpcError::Node { .. }) => Err(WalletError::Rejected(err.to_string())),
            Err(err) => Err(WalletError::Request(err.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "tests/wallet_tests.rs"]
mod tests;
