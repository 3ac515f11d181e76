//! Best-effort cancellation for in-flight analyses.

use std::sync::Arc;

use tokio::sync::watch;

/// A cloneable cancellation flag.
///
/// Cancelling is sticky: once set, every clone reports cancelled and every
/// pending [`cancelled`](CancelToken::cancelled) future resolves.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](CancelToken::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a
        // closed channel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
