//! Per-consumer handle onto the shared coordinator.

use std::sync::Arc;

use tokio::sync::watch;

use super::coordinator::PollingCoordinator;
use super::types::{AuthSnapshot, EnvironmentSignal};

/// A mounted consumer. Dropping it unmounts; the last unmount stops polling.
pub struct AuthConsumer {
    coordinator: Arc<PollingCoordinator>,
    receiver: watch::Receiver<AuthSnapshot>,
}

impl AuthConsumer {
    pub(super) fn new(
        coordinator: Arc<PollingCoordinator>,
        receiver: watch::Receiver<AuthSnapshot>,
    ) -> Self {
        Self {
            coordinator,
            receiver,
        }
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.receiver.borrow().clone()
    }

    /// Wait for the next published state.
    pub async fn changed(&mut self) -> AuthSnapshot {
        // The coordinator owns the sender and outlives this handle.
        let _ = self.receiver.changed().await;
        self.receiver.borrow_and_update().clone()
    }

    /// Wait until no foreground fetch is pending.
    pub async fn settled(&mut self) -> AuthSnapshot {
        match self.receiver.wait_for(|snapshot| !snapshot.loading).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => AuthSnapshot::default(),
        }
    }

    pub async fn refetch(&self) {
        self.coordinator.refetch().await;
    }

    pub async fn sign_out(&self) {
        self.coordinator.sign_out().await;
    }

    pub async fn notify(&self, signal: EnvironmentSignal) -> bool {
        self.coordinator.notify(signal).await
    }

    pub fn coordinator(&self) -> &Arc<PollingCoordinator> {
        &self.coordinator
    }
}

impl Drop for AuthConsumer {
    fn drop(&mut self) {
        self.coordinator.release();
    }
}
