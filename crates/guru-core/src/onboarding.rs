//! First-run onboarding flag.
//!
//! The flag is persisted under `hasSeenOnboarding` and published through a
//! watch channel. Screens hold a receiver for as long as they are mounted;
//! dropping it unsubscribes.

use tokio::sync::watch;
use tracing::warn;

use crate::error::Result;
use crate::storage::KeyValueStorage;

/// Storage key for the onboarding flag.
pub const ONBOARDING_KEY: &str = "hasSeenOnboarding";

/// Observable, persisted onboarding flag.
pub struct OnboardingFlag<S> {
    storage: S,
    tx: watch::Sender<bool>,
}

impl<S: KeyValueStorage> OnboardingFlag<S> {
    /// Read the persisted value. Unreadable values count as not seen.
    pub async fn load(storage: S) -> Self {
        let seen = match storage.get_item(ONBOARDING_KEY).await {
            Ok(value) => value.as_deref() == Some("true"),
            Err(err) => {
                warn!(error = %err, "Failed to read onboarding flag");
                false
            }
        };
        let (tx, _) = watch::channel(seen);
        Self { storage, tx }
    }

    pub fn has_seen(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub async fn mark_seen(&self) -> Result<()> {
        self.storage.set_item(ONBOARDING_KEY, "true").await?;
        self.tx.send_replace(true);
        Ok(())
    }

    pub async fn reset(&self) -> Result<()> {
        self.storage.remove_item(ONBOARDING_KEY).await?;
        self.tx.send_replace(false);
        Ok(())
    }
}
