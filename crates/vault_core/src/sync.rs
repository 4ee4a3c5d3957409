use shared::{
    domain::{VaultField, VaultSnapshot, VaultTopic},
    protocol::{RemoteFailure, VaultNotification},
    Address,
};
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

use crate::{ControllerEvent, VaultController, VaultError, VaultHandle};

/// Outcome of one optional vault read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRead<T> {
    Value(T),
    Unavailable,
}

impl<T> FieldRead<T> {
    /// Logs and swallows a failed read.
    pub fn capture(
        field: VaultField,
        vault: Address,
        read: Result<T, RemoteFailure>,
    ) -> FieldRead<T> {
        match read {
            Ok(value) => FieldRead::Value(value),
            Err(failure) => {
                warn!(%vault, ?field, error = %failure, "sync: field read failed; using default");
                FieldRead::Unavailable
            }
        }
    }

    pub fn value(self) -> Option<T> {
        match self {
            FieldRead::Value(value) => Some(value),
            FieldRead::Unavailable => None,
        }
    }
}

impl<T: Default> FieldRead<T> {
    pub fn or_default(self) -> T {
        self.value().unwrap_or_default()
    }
}

/// Reads a fresh snapshot. Only the balance is required; the remaining
/// fields fall back to their defaults when their reads fail.
pub async fn read_snapshot(handle: &VaultHandle) -> Result<VaultSnapshot, VaultError> {
    let vault = handle.address();
    let balance = handle
        .balance()
        .await
        .map_err(|failure| VaultError::Read(failure.reason_or_message().to_string()))?;

    let (last_active, master_key, secondary_key) = tokio::join!(
        handle.last_active(),
        handle.master_key(),
        handle.secondary_key()
    );
    let last_active = FieldRead::capture(VaultField::LastActive, vault, last_active);
    let master_key = FieldRead::capture(VaultField::MasterKey, vault, master_key);
    let secondary_key = FieldRead::capture(VaultField::SecondaryKey, vault, secondary_key);

    Ok(VaultSnapshot {
        balance,
        last_active: last_active.or_default(),
        is_active: true,
        master_key: master_key.value().filter(|key| *key != Address::ZERO),
        secondary_key: secondary_key.value().filter(|key| *key != Address::ZERO),
    })
}

impl VaultController {
    /// Re-reads the vault and replaces the local snapshot.
    ///
    /// Overlapping refreshes are not ordered: whichever completes last
    /// overwrites the snapshot, even when it was started first.
    pub async fn refresh(&self) -> Result<VaultSnapshot, VaultError> {
        let Some(handle) = self.vault_handle().await else {
            return Ok(self.snapshot().await);
        };

        let snapshot = match read_snapshot(&handle).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(vault = %handle.address(), error = %err, "sync: refresh failed");
                self.emit(ControllerEvent::RefreshFailed(err.to_user_facing()));
                return Err(err);
            }
        };

        *self.snapshot.write().await = snapshot.clone();
        debug!(
            vault = %handle.address(),
            balance = %snapshot.balance,
            last_active = snapshot.last_active,
            "sync: snapshot replaced"
        );
        self.emit(ControllerEvent::SnapshotUpdated(snapshot.clone()));
        Ok(snapshot)
    }

    pub(crate) async fn handle_notification(&self, notification: VaultNotification) {
        info!(
            vault = %notification.vault,
            topic = ?notification.topic,
            account = ?notification.account,
            amount = ?notification.amount,
            "sync: vault notification"
        );
        let _ = self.refresh().await;

        if notification.topic == VaultTopic::ReleaseToBeneficiary
            && !self.release_acknowledged.swap(true, Ordering::SeqCst)
        {
            self.emit(ControllerEvent::Acknowledgment(
                "Beneficiary has claimed the funds!".to_string(),
            ));
        }
    }
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;
