use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use shared::{
    domain::{DeploymentParameters, VaultTopic},
    protocol::{CreationArgs, PendingOperation, RemoteFailure, VaultCall, VaultNotification},
    Address, U256,
};
use storage::LocalStore;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    simulated::{SimulatedChain, SimulatedWallet},
    ControllerConfig, ControllerDependencies, ControllerEvent, DeploymentArtifact, VaultBackend,
    VaultController, WalletError, WalletProvider,
};

pub(crate) const OWNER: Address = Address::repeat_byte(0x11);
pub(crate) const MASTER: Address = Address::repeat_byte(0xbb);
pub(crate) const SECONDARY: Address = Address::repeat_byte(0xaa);
pub(crate) const BENEFICIARY: Address = Address::repeat_byte(0xcc);
pub(crate) const STRANGER: Address = Address::repeat_byte(0x77);

pub(crate) fn hex_address(byte: u8) -> String {
    format!("0x{}", format!("{byte:02x}").repeat(20))
}

pub(crate) fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::from(10u64).pow(U256::from(18u64))
}

pub(crate) fn vault_parameters() -> DeploymentParameters {
    DeploymentParameters {
        secondary_key: hex_address(0xaa),
        master_key: hex_address(0xbb),
        beneficiary: hex_address(0xcc),
        beneficiary_email: "b@x.com".to_string(),
        secret_password: "p1".to_string(),
        withdrawal_password: "p2".to_string(),
    }
}

pub(crate) fn artifact() -> DeploymentArtifact {
    DeploymentArtifact::new(vec![0x60, 0x80, 0x60, 0x40])
}

/// Wraps a simulated chain, optionally holding balance reads until released
/// and failing subscriptions on demand.
pub(crate) struct ScriptedBackend {
    pub(crate) chain: SimulatedChain,
    gated_balances: Mutex<VecDeque<(U256, oneshot::Receiver<()>)>>,
    fail_subscriptions: AtomicBool,
    balance_reads: AtomicUsize,
}

impl ScriptedBackend {
    pub(crate) fn new(chain: SimulatedChain) -> Self {
        Self {
            chain,
            gated_balances: Mutex::new(VecDeque::new()),
            fail_subscriptions: AtomicBool::new(false),
            balance_reads: AtomicUsize::new(0),
        }
    }

    /// The next balance read reports `value`, but only once the returned
    /// sender fires.
    pub(crate) fn gate_next_balance(&self, value: U256) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.gated_balances
            .lock()
            .expect("gates")
            .push_back((value, gate));
        release
    }

    pub(crate) fn fail_subscriptions(&self, failing: bool) {
        self.fail_subscriptions.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn balance_reads(&self) -> usize {
        self.balance_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VaultBackend for ScriptedBackend {
    async fn submit_creation(
        &self,
        from: Address,
        artifact: &DeploymentArtifact,
        args: &CreationArgs,
    ) -> Result<PendingOperation, RemoteFailure> {
        self.chain.submit_creation(from, artifact, args).await
    }

    async fn await_creation(&self, pending: &PendingOperation) -> Result<Address, RemoteFailure> {
        self.chain.await_creation(pending).await
    }

    async fn balance(&self, vault: Address) -> Result<U256, RemoteFailure> {
        self.balance_reads.fetch_add(1, Ordering::SeqCst);
        let gated = self.gated_balances.lock().expect("gates").pop_front();
        match gated {
            Some((value, gate)) => {
                let _ = gate.await;
                Ok(value)
            }
            None => self.chain.balance(vault).await,
        }
    }

    async fn last_active(&self, vault: Address) -> Result<u64, RemoteFailure> {
        self.chain.last_active(vault).await
    }

    async fn master_key(&self, vault: Address) -> Result<Address, RemoteFailure> {
        self.chain.master_key(vault).await
    }

    async fn secondary_key(&self, vault: Address) -> Result<Address, RemoteFailure> {
        self.chain.secondary_key(vault).await
    }

    async fn submit(
        &self,
        from: Address,
        vault: Address,
        call: &VaultCall,
    ) -> Result<PendingOperation, RemoteFailure> {
        self.chain.submit(from, vault, call).await
    }

    async fn await_finality(&self, pending: &PendingOperation) -> Result<(), RemoteFailure> {
        self.chain.await_finality(pending).await
    }

    async fn subscribe(
        &self,
        vault: Address,
        topic: VaultTopic,
    ) -> Result<mpsc::Receiver<VaultNotification>, RemoteFailure> {
        if self.fail_subscriptions.load(Ordering::SeqCst) {
            return Err(RemoteFailure::new("filter not supported"));
        }
        self.chain.subscribe(vault, topic).await
    }
}

/// Wallet whose account request always fails.
pub(crate) struct LockedWallet;

#[async_trait]
impl WalletProvider for LockedWallet {
    async fn request_account(&self) -> Result<Address, WalletError> {
        Err(WalletError::Rejected("User rejected the request.".to_string()))
    }

    async fn switch_network(&self, _chain_id: u64) -> Result<(), WalletError> {
        Ok(())
    }
}

pub(crate) struct Harness {
    pub(crate) controller: Arc<VaultController>,
    pub(crate) chain: SimulatedChain,
    pub(crate) backend: Arc<ScriptedBackend>,
    pub(crate) store: LocalStore,
    pub(crate) events: broadcast::Receiver<ControllerEvent>,
}

impl Harness {
    pub(crate) fn drain_events(&mut self) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Funds `account`, deposits `amount` ether from it into `vault` and
    /// refreshes the controller.
    pub(crate) async fn seed_vault(&self, account: Address, vault: Address, amount: u64) {
        self.chain.fund(account, ether(amount));
        let pending = self
            .chain
            .submit(
                account,
                vault,
                &VaultCall::SecureMoney {
                    value: ether(amount),
                },
            )
            .await
            .expect("seed deposit");
        self.chain.await_finality(&pending).await.expect("seed final");
        self.controller.refresh().await.expect("seed refresh");
    }
}

pub(crate) async fn harness_for(account: Address) -> Harness {
    let chain = SimulatedChain::default();
    let wallet: Arc<dyn WalletProvider> = Arc::new(chain.wallet(account));
    harness_with(chain, Some(wallet), Some(artifact())).await
}

pub(crate) async fn harness() -> Harness {
    harness_for(OWNER).await
}

pub(crate) async fn harness_with(
    chain: SimulatedChain,
    wallet: Option<Arc<dyn WalletProvider>>,
    artifact: Option<DeploymentArtifact>,
) -> Harness {
    harness_with_config(chain, wallet, artifact, ControllerConfig::default()).await
}

pub(crate) async fn harness_with_config(
    chain: SimulatedChain,
    wallet: Option<Arc<dyn WalletProvider>>,
    artifact: Option<DeploymentArtifact>,
    config: ControllerConfig,
) -> Harness {
    let store = LocalStore::new("sqlite::memory:").await.expect("db");
    let backend = Arc::new(ScriptedBackend::new(chain.clone()));
    let controller = VaultController::new(ControllerDependencies {
        wallet,
        backend: backend.clone(),
        artifact,
        store: store.clone(),
        config,
    })
    .await
    .expect("controller");
    let events = controller.subscribe_events();
    Harness {
        controller,
        chain,
        backend,
        store,
        events,
    }
}

pub(crate) fn unknown_network_wallet(account: Address) -> Arc<dyn WalletProvider> {
    Arc::new(SimulatedWallet::new(account, [1u64]))
}

/// Deploys the standard vault from the harness identity.
pub(crate) async fn deployed(harness: &Harness) -> Address {
    harness
        .controller
        .deploy(vault_parameters())
        .await
        .expect("deploy")
        .address()
}
