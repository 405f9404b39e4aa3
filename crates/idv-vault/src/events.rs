//! "Vault changed" notifications
//!
//! Published after every successful mutation so a UI can refresh its
//! identity list without polling the encrypted file.

use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    IdentityAdded { id_string: String },
    IdentityRemoved { id_string: String, remaining: usize },
}

/// Broadcast channel for [`VaultEvent`]s.
#[derive(Debug, Clone)]
pub struct VaultEvents {
    tx: broadcast::Sender<VaultEvent>,
}

impl VaultEvents {
    /// `capacity` events are buffered per lagging subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns the number of subscribers that received the event.
    pub fn emit(&self, event: VaultEvent) -> usize {
        tracing::debug!(?event, "vault changed");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for VaultEvents {
    fn default() -> Self {
        Self::new(64)
    }
}
