use std::{
    fmt,
    sync::{
        atomic::AtomicBool,
        Arc, Mutex as StdMutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::{
    domain::{View, VaultSnapshot, VaultTopic, SEPOLIA_CHAIN_ID},
    error::UserFacingError,
    protocol::{CreationArgs, PendingOperation, RemoteFailure, VaultCall, VaultNotification},
    Address, U256,
};
use storage::LocalStore;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::info;

pub mod commands;
pub mod config;
pub mod deploy;
pub mod error;
pub mod identity;
pub mod session;
pub mod simulated;
pub mod sync;
pub mod watchtower;

pub use commands::{CommandKind, CommandState};
pub use deploy::DeploymentArtifact;
pub use error::{translate, VaultError};
pub use identity::Identity;
pub use sync::FieldRead;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("wallet has no accounts available")]
    NoAccounts,
    #[error("wallet rejected the request: {0}")]
    Rejected(String),
    #[error("network {chain_id:#x} is not known to the wallet")]
    UnknownNetwork { chain_id: u64 },
    #[error("wallet request failed: {0}")]
    Request(String),
}

/// Ambient wallet that owns the signing keys.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn request_account(&self) -> std::result::Result<Address, WalletError>;
    async fn switch_network(&self, chain_id: u64) -> std::result::Result<(), WalletError>;
}

/// Remote vault service. Every mutating operation is split into a submission
/// and a separate wait for finality.
#[async_trait]
pub trait VaultBackend: Send + Sync {
    async fn submit_creation(
        &self,
        from: Address,
        artifact: &DeploymentArtifact,
        args: &CreationArgs,
    ) -> std::result::Result<PendingOperation, RemoteFailure>;
    async fn await_creation(
        &self,
        pending: &PendingOperation,
    ) -> std::result::Result<Address, RemoteFailure>;
    async fn balance(&self, vault: Address) -> std::result::Result<U256, RemoteFailure>;
    async fn last_active(&self, vault: Address) -> std::result::Result<u64, RemoteFailure>;
    async fn master_key(&self, vault: Address) -> std::result::Result<Address, RemoteFailure>;
    async fn secondary_key(&self, vault: Address) -> std::result::Result<Address, RemoteFailure>;
    async fn submit(
        &self,
        from: Address,
        vault: Address,
        call: &VaultCall,
    ) -> std::result::Result<PendingOperation, RemoteFailure>;
    async fn await_finality(
        &self,
        pending: &PendingOperation,
    ) -> std::result::Result<(), RemoteFailure>;
    /// Notifications for one topic; the subscription ends when the receiver is dropped.
    async fn subscribe(
        &self,
        vault: Address,
        topic: VaultTopic,
    ) -> std::result::Result<mpsc::Receiver<VaultNotification>, RemoteFailure>;
}

/// A vault address bound to the backend that can reach it.
#[derive(Clone)]
pub struct VaultHandle {
    address: Address,
    backend: Arc<dyn VaultBackend>,
}

impl VaultHandle {
    pub fn new(address: Address, backend: Arc<dyn VaultBackend>) -> Self {
        Self { address, backend }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn balance(&self) -> std::result::Result<U256, RemoteFailure> {
        self.backend.balance(self.address).await
    }

    pub async fn last_active(&self) -> std::result::Result<u64, RemoteFailure> {
        self.backend.last_active(self.address).await
    }

    pub async fn master_key(&self) -> std::result::Result<Address, RemoteFailure> {
        self.backend.master_key(self.address).await
    }

    pub async fn secondary_key(&self) -> std::result::Result<Address, RemoteFailure> {
        self.backend.secondary_key(self.address).await
    }

    pub async fn submit(
        &self,
        from: Address,
        call: &VaultCall,
    ) -> std::result::Result<PendingOperation, RemoteFailure> {
        self.backend.submit(from, self.address, call).await
    }

    pub async fn await_finality(
        &self,
        pending: &PendingOperation,
    ) -> std::result::Result<(), RemoteFailure> {
        self.backend.await_finality(pending).await
    }

    pub async fn subscribe(
        &self,
        topic: VaultTopic,
    ) -> std::result::Result<mpsc::Receiver<VaultNotification>, RemoteFailure> {
        self.backend.subscribe(self.address, topic).await
    }
}

impl fmt::Debug for VaultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultHandle")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl PartialEq for VaultHandle {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    IdentityChanged(Option<Address>),
    ViewChanged(View),
    SnapshotUpdated(VaultSnapshot),
    CommandStateChanged(CommandState),
    /// Persistent inline message.
    Error(UserFacingError),
    /// Blocking notice the user has to dismiss.
    Acknowledgment(String),
    Warning(String),
    RefreshFailed(UserFacingError),
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub required_chain_id: u64,
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            required_chain_id: SEPOLIA_CHAIN_ID,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

pub struct ControllerDependencies {
    pub wallet: Option<Arc<dyn WalletProvider>>,
    pub backend: Arc<dyn VaultBackend>,
    pub artifact: Option<DeploymentArtifact>,
    pub store: LocalStore,
    pub config: ControllerConfig,
}

#[derive(Debug, Clone, Default)]
struct Scope {
    view: View,
    handle: Option<VaultHandle>,
}

/// The vault lifecycle controller: identity, deployment, synchronisation,
/// commands and session scoping for one user.
pub struct VaultController {
    wallet: Option<Arc<dyn WalletProvider>>,
    backend: Arc<dyn VaultBackend>,
    artifact: Option<DeploymentArtifact>,
    store: LocalStore,
    config: ControllerConfig,
    identity: RwLock<Option<Identity>>,
    scope: RwLock<Scope>,
    snapshot: RwLock<VaultSnapshot>,
    command: StdMutex<CommandState>,
    session: Mutex<Option<session::Session>>,
    release_acknowledged: AtomicBool,
    beneficiary_email: Mutex<String>,
    deposit_draft: StdMutex<String>,
    events: broadcast::Sender<ControllerEvent>,
}

impl VaultController {
    pub async fn new(deps: ControllerDependencies) -> Result<Arc<Self>> {
        let beneficiary_email = deps
            .store
            .load_beneficiary_email()
            .await
            .context("failed to load the persisted beneficiary email")?
            .unwrap_or_default();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            required_chain_id = deps.config.required_chain_id,
            poll_interval_secs = deps.config.poll_interval.as_secs(),
            has_wallet = deps.wallet.is_some(),
            has_artifact = deps.artifact.is_some(),
            "controller: initialized"
        );

        Ok(Arc::new(Self {
            wallet: deps.wallet,
            backend: deps.backend,
            artifact: deps.artifact,
            store: deps.store,
            config: deps.config,
            identity: RwLock::new(None),
            scope: RwLock::new(Scope::default()),
            snapshot: RwLock::new(VaultSnapshot::default()),
            command: StdMutex::new(CommandState::default()),
            session: Mutex::new(None),
            release_acknowledged: AtomicBool::new(false),
            beneficiary_email: Mutex::new(beneficiary_email),
            deposit_draft: StdMutex::new(String::new()),
            events,
        }))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub async fn identity(&self) -> Option<Identity> {
        *self.identity.read().await
    }

    pub async fn view(&self) -> View {
        self.scope.read().await.view
    }

    pub async fn vault_handle(&self) -> Option<VaultHandle> {
        self.scope.read().await.handle.clone()
    }

    pub async fn vault_address(&self) -> Option<Address> {
        self.scope.read().await.handle.as_ref().map(VaultHandle::address)
    }

    pub async fn snapshot(&self) -> VaultSnapshot {
        self.snapshot.read().await.clone()
    }

    pub fn command_state(&self) -> CommandState {
        self.command_guard().clone()
    }

    pub async fn beneficiary_email(&self) -> String {
        self.beneficiary_email.lock().await.clone()
    }

    /// Updates the beneficiary email and persists it when it changed.
    pub async fn set_beneficiary_email(&self, email: &str) -> std::result::Result<(), VaultError> {
        let mut current = self.beneficiary_email.lock().await;
        if *current == email {
            return Ok(());
        }
        self.store
            .save_beneficiary_email(email)
            .await
            .map_err(|err| VaultError::LocalState(err.to_string()))?;
        *current = email.to_string();
        Ok(())
    }

    pub fn deposit_draft(&self) -> String {
        lock_std(&self.deposit_draft).clone()
    }

    pub fn set_deposit_draft(&self, amount: &str) {
        *lock_std(&self.deposit_draft) = amount.to_string();
    }

    fn command_guard(&self) -> MutexGuard<'_, CommandState> {
        lock_std(&self.command)
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }

    /// Records a failure as the persistent inline message.
    fn report_error(&self, err: &VaultError) {
        let user_facing = err.to_user_facing();
        self.command_guard().last_error = Some(user_facing.clone());
        self.emit(ControllerEvent::Error(user_facing));
    }

    fn clear_error(&self) {
        self.command_guard().last_error = None;
    }
}

fn lock_std<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
