//! In-memory chain that runs the vault contract rules locally.
//!
//! Used by the console's offline mode and throughout the tests: it keeps a
//! manual clock, account balances, deployed vaults and per-topic
//! subscribers, and can be told to fail individual reads or the next
//! submission.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{VaultField, VaultTopic, SEPOLIA_CHAIN_ID},
    protocol::{CreationArgs, PendingOperation, RemoteFailure, VaultCall, VaultNotification},
    Address, U256,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    error::{INVALID_PASSWORD_PHRASE, NO_MONEY_PHRASE, STILL_ACTIVE_PHRASE},
    DeploymentArtifact, VaultBackend, WalletError, WalletProvider,
};

const SUBSCRIPTION_BUFFER: usize = 16;
/// Inactivity window after which the beneficiary may claim.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone)]
struct SimulatedVault {
    secondary_key: Address,
    master_key: Address,
    beneficiary: Address,
    secret_password: String,
    withdrawal_password: String,
    last_active: u64,
    balance: U256,
}

#[derive(Debug)]
enum PendingEffect {
    Creation(Address),
    Call(Option<VaultNotification>),
}

#[derive(Default)]
struct ChainState {
    now: u64,
    accounts: HashMap<Address, U256>,
    vaults: HashMap<Address, SimulatedVault>,
    pending: HashMap<String, PendingEffect>,
    subscribers: HashMap<Address, Vec<(VaultTopic, mpsc::Sender<VaultNotification>)>>,
    failing_reads: HashSet<VaultField>,
    next_failure: Option<RemoteFailure>,
    next_id: u64,
    submissions: usize,
    reads: usize,
}

impl ChainState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn read_guard(&mut self, field: VaultField) -> Result<(), RemoteFailure> {
        self.reads += 1;
        if self.failing_reads.contains(&field) {
            return Err(RemoteFailure::new(format!("{field:?} read unavailable")));
        }
        Ok(())
    }

    fn vault(&self, vault: Address) -> Result<&SimulatedVault, RemoteFailure> {
        self.vaults
            .get(&vault)
            .ok_or_else(|| RemoteFailure::new("could not decode result data (value=\"0x\")"))
    }

    fn debit(&mut self, account: Address, value: U256) -> Result<(), RemoteFailure> {
        let balance = self.accounts.entry(account).or_default();
        if *balance < value {
            return Err(RemoteFailure::new("insufficient funds for gas * price + value")
                .with_provider_message("insufficient funds for transfer"));
        }
        *balance -= value;
        Ok(())
    }

    fn credit(&mut self, account: Address, value: U256) {
        *self.accounts.entry(account).or_default() += value;
    }

    fn apply_call(
        &mut self,
        from: Address,
        vault_address: Address,
        call: &VaultCall,
        timeout_secs: u64,
    ) -> Result<Option<VaultNotification>, RemoteFailure> {
        let now = self.now;
        let vault = self
            .vaults
            .get(&vault_address)
            .cloned()
            .ok_or_else(|| RemoteFailure::new("transaction reverted without a reason"))?;
        let is_key_holder = from == vault.master_key || from == vault.secondary_key;

        let notification = |topic, account: Option<Address>, amount: Option<U256>, note| {
            VaultNotification {
                topic,
                vault: vault_address,
                account,
                amount,
                note,
            }
        };

        let (updated, event) = match call {
            VaultCall::Ping { extension_seconds } => {
                if !is_key_holder {
                    return Err(RemoteFailure::revert(INVALID_PASSWORD_PHRASE));
                }
                let updated = SimulatedVault {
                    last_active: now.saturating_add(*extension_seconds),
                    ..vault
                };
                let event = notification(
                    VaultTopic::ExtensionOfTime,
                    None,
                    None,
                    Some(format!("timer extended by {extension_seconds}s")),
                );
                (updated, event)
            }
            VaultCall::SecureMoney { value } => {
                self.debit(from, *value)?;
                let updated = SimulatedVault {
                    balance: vault.balance + *value,
                    ..vault
                };
                let event = notification(VaultTopic::FundsSecured, Some(from), Some(*value), None);
                (updated, event)
            }
            VaultCall::WithdrawMoneyOwner { password } => {
                if !is_key_holder || *password != vault.withdrawal_password {
                    return Err(RemoteFailure::revert(INVALID_PASSWORD_PHRASE));
                }
                if vault.balance.is_zero() {
                    return Err(RemoteFailure::revert(NO_MONEY_PHRASE));
                }
                let amount = vault.balance;
                self.credit(from, amount);
                let updated = SimulatedVault {
                    balance: U256::ZERO,
                    ..vault
                };
                let event = notification(VaultTopic::Withdrawal, Some(from), Some(amount), None);
                (updated, event)
            }
            VaultCall::UserDied { password } => {
                if now <= vault.last_active.saturating_add(timeout_secs) {
                    return Err(RemoteFailure::revert(STILL_ACTIVE_PHRASE));
                }
                if *password != vault.secret_password {
                    return Err(RemoteFailure::revert(INVALID_PASSWORD_PHRASE));
                }
                if vault.balance.is_zero() {
                    return Err(RemoteFailure::revert(NO_MONEY_PHRASE));
                }
                let amount = vault.balance;
                let beneficiary = vault.beneficiary;
                self.credit(beneficiary, amount);
                let updated = SimulatedVault {
                    balance: U256::ZERO,
                    ..vault
                };
                let event = notification(
                    VaultTopic::ReleaseToBeneficiary,
                    Some(beneficiary),
                    Some(amount),
                    None,
                );
                (updated, event)
            }
        };

        self.vaults.insert(vault_address, updated);
        Ok(Some(event))
    }

    fn publish(&mut self, notification: VaultNotification) {
        let Some(subscribers) = self.subscribers.get_mut(&notification.vault) else {
            return;
        };
        subscribers.retain(|(_, sender)| !sender.is_closed());
        for (topic, sender) in subscribers.iter() {
            if *topic != notification.topic {
                continue;
            }
            if let Err(err) = sender.try_send(notification.clone()) {
                warn!(topic = ?notification.topic, error = %err, "simulated: notification dropped");
            }
        }
    }
}

/// Shared in-memory chain. Cheap to clone.
#[derive(Clone)]
pub struct SimulatedChain {
    chain_id: u64,
    timeout_secs: u64,
    state: Arc<Mutex<ChainState>>,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new(SEPOLIA_CHAIN_ID, DEFAULT_TIMEOUT_SECS)
    }
}

impl SimulatedChain {
    pub fn new(chain_id: u64, timeout_secs: u64) -> Self {
        let state = ChainState {
            now: u64::try_from(Utc::now().timestamp()).unwrap_or_default(),
            ..ChainState::default()
        };
        Self {
            chain_id,
            timeout_secs,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn now(&self) -> u64 {
        self.state().now
    }

    pub fn advance_time(&self, seconds: u64) {
        let mut state = self.state();
        state.now = state.now.saturating_add(seconds);
    }

    pub fn fund(&self, account: Address, amount: U256) {
        self.state().credit(account, amount);
    }

    pub fn account_balance(&self, account: Address) -> U256 {
        self.state().accounts.get(&account).copied().unwrap_or_default()
    }

    /// Makes every read of `field` fail until cleared.
    pub fn fail_reads(&self, field: VaultField, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing_reads.insert(field);
        } else {
            state.failing_reads.remove(&field);
        }
    }

    /// The next submission (creation or call) is refused with `failure`.
    pub fn fail_next_submission(&self, failure: RemoteFailure) {
        self.state().next_failure = Some(failure);
    }

    pub fn submission_count(&self) -> usize {
        self.state().submissions
    }

    pub fn read_count(&self) -> usize {
        self.state().reads
    }

    /// Live subscriptions for `vault`, i.e. those whose receiver still exists.
    pub fn active_subscriptions(&self, vault: Address) -> usize {
        self.state()
            .subscribers
            .get(&vault)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .filter(|(_, sender)| !sender.is_closed())
                    .count()
            })
            .unwrap_or_default()
    }

    pub fn wallet(&self, account: Address) -> SimulatedWallet {
        SimulatedWallet::new(account, [self.chain_id])
    }
}

#[async_trait]
impl VaultBackend for SimulatedChain {
    async fn submit_creation(
        &self,
        _from: Address,
        artifact: &DeploymentArtifact,
        args: &CreationArgs,
    ) -> Result<PendingOperation, RemoteFailure> {
        let mut state = self.state();
        state.submissions += 1;
        if let Some(failure) = state.next_failure.take() {
            return Err(failure);
        }
        if artifact.is_empty() {
            return Err(RemoteFailure::new("contract creation code is empty"));
        }

        let sequence = state.next_id;
        let mut bytes = [0u8; 20];
        bytes[0] = 0x5a;
        bytes[12..].copy_from_slice(&(sequence + 1).to_be_bytes());
        let address = Address::from(bytes);
        let now = state.now;
        state.vaults.insert(
            address,
            SimulatedVault {
                secondary_key: args.secondary_key,
                master_key: args.master_key,
                beneficiary: args.beneficiary,
                secret_password: args.secret_password.clone(),
                withdrawal_password: args.withdrawal_password.clone(),
                last_active: now,
                balance: U256::ZERO,
            },
        );
        let id = state.next_id("create");
        state.pending.insert(id.clone(), PendingEffect::Creation(address));
        debug!(vault = %address, operation = %id, "simulated: vault created");
        Ok(PendingOperation::new(id))
    }

    async fn await_creation(&self, pending: &PendingOperation) -> Result<Address, RemoteFailure> {
        match self.state().pending.remove(&pending.id) {
            Some(PendingEffect::Creation(address)) => Ok(address),
            _ => Err(RemoteFailure::new(format!(
                "unknown creation {}",
                pending.id
            ))),
        }
    }

    async fn balance(&self, vault: Address) -> Result<U256, RemoteFailure> {
        let mut state = self.state();
        state.read_guard(VaultField::Balance)?;
        Ok(state
            .vaults
            .get(&vault)
            .map(|vault| vault.balance)
            .or_else(|| state.accounts.get(&vault).copied())
            .unwrap_or_default())
    }

    async fn last_active(&self, vault: Address) -> Result<u64, RemoteFailure> {
        let mut state = self.state();
        state.read_guard(VaultField::LastActive)?;
        Ok(state.vault(vault)?.last_active)
    }

    async fn master_key(&self, vault: Address) -> Result<Address, RemoteFailure> {
        let mut state = self.state();
        state.read_guard(VaultField::MasterKey)?;
        Ok(state.vault(vault)?.master_key)
    }

    async fn secondary_key(&self, vault: Address) -> Result<Address, RemoteFailure> {
        let mut state = self.state();
        state.read_guard(VaultField::SecondaryKey)?;
        Ok(state.vault(vault)?.secondary_key)
    }

    async fn submit(
        &self,
        from: Address,
        vault: Address,
        call: &VaultCall,
    ) -> Result<PendingOperation, RemoteFailure> {
        let mut state = self.state();
        state.submissions += 1;
        if let Some(failure) = state.next_failure.take() {
            return Err(failure);
        }
        let notification = state.apply_call(from, vault, call, self.timeout_secs)?;
        let id = state.next_id(call.name());
        state
            .pending
            .insert(id.clone(), PendingEffect::Call(notification));
        Ok(PendingOperation::new(id))
    }

    async fn await_finality(&self, pending: &PendingOperation) -> Result<(), RemoteFailure> {
        let mut state = self.state();
        match state.pending.remove(&pending.id) {
            Some(PendingEffect::Call(notification)) => {
                if let Some(notification) = notification {
                    state.publish(notification);
                }
                Ok(())
            }
            _ => Err(RemoteFailure::new(format!(
                "unknown operation {}",
                pending.id
            ))),
        }
    }

    async fn subscribe(
        &self,
        vault: Address,
        topic: VaultTopic,
    ) -> Result<mpsc::Receiver<VaultNotification>, RemoteFailure> {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.state()
            .subscribers
            .entry(vault)
            .or_default()
            .push((topic, sender));
        Ok(receiver)
    }
}

/// Wallet holding one account that knows a fixed set of networks.
pub struct SimulatedWallet {
    account: Address,
    known_networks: HashSet<u64>,
    active_network: Mutex<Option<u64>>,
    switch_failure: Option<String>,
}

impl SimulatedWallet {
    pub fn new(account: Address, known_networks: impl IntoIterator<Item = u64>) -> Self {
        Self {
            account,
            known_networks: known_networks.into_iter().collect(),
            active_network: Mutex::new(None),
            switch_failure: None,
        }
    }

    /// Every network switch fails with `message`, as when the user dismisses the prompt.
    pub fn with_switch_failure(mut self, message: impl Into<String>) -> Self {
        self.switch_failure = Some(message.into());
        self
    }

    pub fn active_network(&self) -> Option<u64> {
        *self
            .active_network
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl WalletProvider for SimulatedWallet {
    async fn request_account(&self) -> Result<Address, WalletError> {
        Ok(self.account)
    }

    async fn switch_network(&self, chain_id: u64) -> Result<(), WalletError> {
        if !self.known_networks.contains(&chain_id) {
            return Err(WalletError::UnknownNetwork { chain_id });
        }
        if let Some(message) = &self.switch_failure {
            return Err(WalletError::Rejected(message.clone()));
        }
        *self
            .active_network
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(chain_id);
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/simulated_tests.rs"]
mod tests;
