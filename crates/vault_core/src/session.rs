use std::sync::{atomic::Ordering, Arc, Weak};

use futures::StreamExt;
use shared::{
    domain::{View, VaultSnapshot, VaultTopic},
    Address,
};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, info, warn};

use crate::{ControllerEvent, Scope, VaultController, VaultError, VaultHandle};

/// Resources scoped to one (view, vault) pair: the poll timer and one
/// listener per notification topic. Dropping a session aborts them.
pub(crate) struct Session {
    vault: Address,
    poll_task: Option<JoinHandle<()>>,
    listeners: Vec<(VaultTopic, JoinHandle<()>)>,
}

impl Session {
    fn new(vault: Address) -> Self {
        Self {
            vault,
            poll_task: None,
            listeners: Vec::with_capacity(VaultTopic::ALL.len()),
        }
    }

    pub(crate) fn vault(&self) -> Address {
        self.vault
    }

    pub(crate) fn task_count(&self) -> usize {
        self.listeners.len() + usize::from(self.poll_task.is_some())
    }

    fn take_tasks(&mut self) -> Vec<JoinHandle<()>> {
        let mut tasks: Vec<JoinHandle<()>> = self
            .listeners
            .drain(..)
            .map(|(_, task)| task)
            .collect();
        tasks.extend(self.poll_task.take());
        tasks
    }

    /// Aborts every task and waits until each has actually stopped, so the
    /// receivers they own are gone when this returns.
    pub(crate) async fn close(mut self) {
        let tasks = self.take_tasks();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        info!(vault = %self.vault, "session: closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in self.take_tasks() {
            task.abort();
        }
    }
}

impl VaultController {
    /// Moves to a new (view, vault) pair. The previous session is always torn
    /// down first; entering the dashboard with a vault refreshes once and then
    /// starts polling and listening.
    pub async fn set_scope(
        self: &Arc<Self>,
        view: View,
        handle: Option<VaultHandle>,
    ) -> Result<(), VaultError> {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            previous.close().await;
        }

        let vault_changed = {
            let mut scope = self.scope.write().await;
            let changed = scope.handle.as_ref().map(VaultHandle::address)
                != handle.as_ref().map(VaultHandle::address);
            *scope = Scope {
                view,
                handle: handle.clone(),
            };
            changed
        };
        if vault_changed {
            *self.snapshot.write().await = VaultSnapshot::default();
            self.emit(ControllerEvent::SnapshotUpdated(VaultSnapshot::default()));
        }
        self.emit(ControllerEvent::ViewChanged(view));

        let handle = match (view, handle) {
            (View::Dashboard, Some(handle)) => handle,
            _ => return Ok(()),
        };

        match self.open_session(&handle).await {
            Ok(opened) => {
                *session = Some(opened);
                Ok(())
            }
            Err(err) => {
                warn!(vault = %handle.address(), error = %err, "session: failed to open");
                self.report_error(&err);
                Err(err)
            }
        }
    }

    async fn open_session(self: &Arc<Self>, handle: &VaultHandle) -> Result<Session, VaultError> {
        let mut session = Session::new(handle.address());
        self.release_acknowledged.store(false, Ordering::SeqCst);

        let _ = self.refresh().await;

        for topic in VaultTopic::ALL {
            let receiver = handle
                .subscribe(topic)
                .await
                .map_err(|failure| VaultError::Subscription(failure.to_string()))?;
            session
                .listeners
                .push((topic, self.spawn_listener(topic, receiver)));
        }
        session.poll_task = Some(self.spawn_poller());

        info!(
            vault = %handle.address(),
            tasks = session.task_count(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "session: opened"
        );
        Ok(session)
    }

    fn spawn_listener(
        self: &Arc<Self>,
        topic: VaultTopic,
        mut receiver: tokio::sync::mpsc::Receiver<shared::protocol::VaultNotification>,
    ) -> JoinHandle<()> {
        let controller: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(notification) = receiver.recv().await {
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                controller.handle_notification(notification).await;
            }
            debug!(?topic, "session: listener finished");
        })
    }

    fn spawn_poller(self: &Arc<Self>) -> JoinHandle<()> {
        let controller: Weak<Self> = Arc::downgrade(self);
        let period = self.config.poll_interval;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut ticks = IntervalStream::new(ticker);
            while ticks.next().await.is_some() {
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                let _ = controller.refresh().await;
            }
        })
    }

    /// Leaves the dashboard but keeps the vault handle for later.
    pub async fn leave_dashboard(self: &Arc<Self>) {
        let handle = self.vault_handle().await;
        let _ = self.set_scope(View::Deploy, handle).await;
    }

    /// Re-enters the dashboard of the current vault, if there is one.
    pub async fn open_dashboard(self: &Arc<Self>) -> Result<(), VaultError> {
        let handle = self.vault_handle().await.ok_or(VaultError::NoVault)?;
        self.set_scope(View::Dashboard, Some(handle)).await
    }

    /// Tears everything down and clears the vault handle.
    pub(crate) async fn teardown_scope(&self) {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            previous.close().await;
        }
        *self.scope.write().await = Scope::default();
        *self.snapshot.write().await = VaultSnapshot::default();
        self.emit(ControllerEvent::SnapshotUpdated(VaultSnapshot::default()));
        self.emit(ControllerEvent::ViewChanged(View::Deploy));
    }

    /// Vault and task count of the live session, if any.
    pub async fn session_status(&self) -> Option<(Address, usize)> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| (session.vault(), session.task_count()))
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
