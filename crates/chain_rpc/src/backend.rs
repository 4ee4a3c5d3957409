use std::{sync::Arc, time::Duration};

use alloy_primitives::{hex, Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use shared::{
    domain::VaultTopic,
    protocol::{CreationArgs, PendingOperation, RemoteFailure, VaultCall, VaultNotification},
};
use tokio::{sync::mpsc, time::sleep};
use tracing::{debug, info, warn};
use vault_core::{DeploymentArtifact, VaultBackend};

use crate::{
    abi::{self, Token},
    client::{parse_quantity, quantity, RpcClient, RpcError},
};

const NOTIFICATION_BUFFER: usize = 32;

#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Delay between receipt lookups while waiting for finality.
    pub receipt_interval: Duration,
    /// Delay between log queries for subscriptions.
    pub log_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            receipt_interval: Duration::from_secs(2),
            log_interval: Duration::from_secs(4),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    contract_address: Option<Address>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEntry {
    topics: Vec<B256>,
    data: Bytes,
    #[serde(default)]
    block_number: Option<String>,
}

/// Vault contract reached through a JSON-RPC node.
#[derive(Clone)]
pub struct RpcVaultBackend {
    client: Arc<RpcClient>,
    poll: PollSettings,
}

impl RpcVaultBackend {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self::with_poll_settings(client, PollSettings::default())
    }

    pub fn with_poll_settings(client: Arc<RpcClient>, poll: PollSettings) -> Self {
        Self { client, poll }
    }

    async fn send_transaction(&self, transaction: Value) -> Result<PendingOperation, RemoteFailure> {
        let hash: B256 = self
            .client
            .request("eth_sendTransaction", json!([transaction]))
            .await?;
        Ok(PendingOperation::new(hash.to_string()))
    }

    async fn call(&self, vault: Address, signature: &str) -> Result<Vec<u8>, RemoteFailure> {
        let data = abi::encode_call(signature, &[]);
        let result: Bytes = self
            .client
            .request(
                "eth_call",
                json!([{ "to": vault, "data": hex::encode_prefixed(data) }, "latest"]),
            )
            .await?;
        Ok(result.to_vec())
    }

    /// Polls until the transaction is mined. There is no deadline; dropping
    /// the future is the only way to stop waiting.
    async fn receipt(&self, pending: &PendingOperation) -> Result<TransactionReceipt, RemoteFailure> {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let receipt: Option<TransactionReceipt> = self
                .client
                .request("eth_getTransactionReceipt", json!([pending.id]))
                .await?;
            if let Some(receipt) = receipt {
                if receipt.status.as_deref() == Some("0x0") {
                    return Err(RemoteFailure::new(format!(
                        "transaction {} reverted",
                        pending.id
                    )));
                }
                debug!(operation = %pending.id, attempt, "rpc: receipt available");
                return Ok(receipt);
            }
            sleep(self.poll.receipt_interval).await;
        }
    }
}

fn decode_failure(err: abi::AbiError) -> RemoteFailure {
    RemoteFailure::new(format!("could not decode result data: {err}"))
}

fn call_data(call: &VaultCall) -> Vec<u8> {
    let tokens = match call {
        VaultCall::Ping { extension_seconds } => vec![Token::Uint(U256::from(*extension_seconds))],
        VaultCall::SecureMoney { .. } => Vec::new(),
        VaultCall::WithdrawMoneyOwner { password } | VaultCall::UserDied { password } => {
            vec![Token::String(password.clone())]
        }
    };
    abi::encode_call(call.function_signature(), &tokens)
}

fn creation_data(artifact: &DeploymentArtifact, args: &CreationArgs) -> Vec<u8> {
    let mut data = artifact.bytecode().to_vec();
    data.extend_from_slice(&abi::encode(&[
        Token::Address(args.secondary_key),
        Token::Address(args.master_key),
        Token::Address(args.beneficiary),
        Token::String(args.secret_password.clone()),
        Token::String(args.withdrawal_password.clone()),
    ]));
    data
}

fn notification_from_log(vault: Address, topic: VaultTopic, log: &LogEntry) -> Option<VaultNotification> {
    let data = log.data.as_ref();
    let notification = match topic {
        VaultTopic::ExtensionOfTime => VaultNotification {
            topic,
            vault,
            account: None,
            amount: None,
            note: abi::decode_string(data, 0).ok(),
        },
        _ => VaultNotification {
            topic,
            vault,
            account: Some(abi::decode_address(data, 0).ok()?),
            amount: Some(abi::decode_uint(data, 1).ok()?),
            note: None,
        },
    };
    Some(notification)
}

async fn block_number(client: &RpcClient) -> Result<u64, RpcError> {
    let raw: String = client.request("eth_blockNumber", json!([])).await?;
    let number = parse_quantity("eth_blockNumber", &raw)?;
    u64::try_from(number).map_err(|_| RpcError::decode("eth_blockNumber", "block number overflows"))
}

/// Polls `eth_getLogs` for one event until the receiver goes away.
async fn watch_logs(
    client: Arc<RpcClient>,
    vault: Address,
    topic: VaultTopic,
    mut next_block: u64,
    interval: Duration,
    sender: mpsc::Sender<VaultNotification>,
) {
    let topic0 = abi::event_topic(topic.event_signature());
    loop {
        tokio::select! {
            _ = sender.closed() => break,
            _ = sleep(interval) => {}
        }

        let filter = json!([{
            "address": vault,
            "topics": [topic0],
            "fromBlock": quantity(next_block),
            "toBlock": "latest",
        }]);
        let logs: Vec<LogEntry> = match client.request("eth_getLogs", filter).await {
            Ok(logs) => logs,
            Err(err) => {
                warn!(%vault, ?topic, error = %err, "rpc: log poll failed");
                continue;
            }
        };

        for log in &logs {
            if log.topics.first() != Some(&topic0) {
                continue;
            }
            if let Some(number) = log
                .block_number
                .as_deref()
                .and_then(|raw| parse_quantity("eth_getLogs", raw).ok())
                .and_then(|number| u64::try_from(number).ok())
            {
                next_block = next_block.max(number + 1);
            }
            let Some(notification) = notification_from_log(vault, topic, log) else {
                warn!(%vault, ?topic, "rpc: undecodable log skipped");
                continue;
            };
            if sender.send(notification).await.is_err() {
                break;
            }
        }
    }
    debug!(%vault, ?topic, "rpc: log watcher stopped");
}

#[async_trait]
impl VaultBackend for RpcVaultBackend {
    async fn submit_creation(
        &self,
        from: Address,
        artifact: &DeploymentArtifact,
        args: &CreationArgs,
    ) -> Result<PendingOperation, RemoteFailure> {
        let data = creation_data(artifact, args);
        let pending = self
            .send_transaction(json!({ "from": from, "data": hex::encode_prefixed(data) }))
            .await?;
        info!(operation = %pending.id, "rpc: creation submitted");
        Ok(pending)
    }

    async fn await_creation(&self, pending: &PendingOperation) -> Result<Address, RemoteFailure> {
        self.receipt(pending)
            .await?
            .contract_address
            .ok_or_else(|| RemoteFailure::new(format!("receipt for {} has no contract address", pending.id)))
    }

    async fn balance(&self, vault: Address) -> Result<U256, RemoteFailure> {
        let raw: String = self
            .client
            .request("eth_getBalance", json!([vault, "latest"]))
            .await?;
        Ok(parse_quantity("eth_getBalance", &raw)?)
    }

    async fn last_active(&self, vault: Address) -> Result<u64, RemoteFailure> {
        let data = self.call(vault, "lastactive()").await?;
        let value = abi::decode_uint(&data, 0).map_err(decode_failure)?;
        u64::try_from(value).map_err(|_| RemoteFailure::new("lastactive does not fit in 64 bits"))
    }

    async fn master_key(&self, vault: Address) -> Result<Address, RemoteFailure> {
        let data = self.call(vault, "masterkey()").await?;
        abi::decode_address(&data, 0).map_err(decode_failure)
    }

    async fn secondary_key(&self, vault: Address) -> Result<Address, RemoteFailure> {
        let data = self.call(vault, "senkey()").await?;
        abi::decode_address(&data, 0).map_err(decode_failure)
    }

    async fn submit(
        &self,
        from: Address,
        vault: Address,
        call: &VaultCall,
    ) -> Result<PendingOperation, RemoteFailure> {
        let transaction = json!({
            "from": from,
            "to": vault,
            "data": hex::encode_prefixed(call_data(call)),
            "value": format!("{:#x}", call.value()),
        });
        let pending = self.send_transaction(transaction).await?;
        info!(operation = %pending.id, call = call.name(), "rpc: call submitted");
        Ok(pending)
    }

    async fn await_finality(&self, pending: &PendingOperation) -> Result<(), RemoteFailure> {
        self.receipt(pending).await.map(|_| ())
    }

    async fn subscribe(
        &self,
        vault: Address,
        topic: VaultTopic,
    ) -> Result<mpsc::Receiver<VaultNotification>, RemoteFailure> {
        let start = block_number(&self.client).await? + 1;
        let (sender, receiver) = mpsc::channel(NOTIFICATION_BUFFER);
        tokio::spawn(watch_logs(
            Arc::clone(&self.client),
            vault,
            topic,
            start,
            self.poll.log_interval,
            sender,
        ));
        debug!(%vault, ?topic, from_block = start, "rpc: subscribed");
        Ok(receiver)
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;
