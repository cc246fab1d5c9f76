//! Shutdown coordination for the host.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Coordinator for graceful shutdown.
///
/// One trigger reaches two audiences: background tasks subscribed to the
/// broadcast channel, and any load started with [`Shutdown::cancel_token`],
/// which stops before its next wave.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    cancel: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Child token cancelled by [`Shutdown::trigger`]; pass it to `ModuleTree::load_with`.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn trigger(&self) {
        self.cancel.cancel();
        let _ = self.tx.send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
