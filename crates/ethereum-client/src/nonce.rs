//! Per-signer nonce sequencing
//!
//! Transactions from one signer queue on a single mutex: a sender holds the
//! slot from nonce selection until the node accepts (or rejects) the
//! transaction, so concurrent swaps never race for the same nonce.

use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct NonceTracker {
    next: Mutex<Option<u64>>,
}

/// Exclusive right to send the signer's next transaction
pub struct NonceSlot<'a> {
    guard: MutexGuard<'a, Option<u64>>,
}

impl NonceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the signer to be free
    pub async fn acquire(&self) -> NonceSlot<'_> {
        NonceSlot {
            guard: self.next.lock().await,
        }
    }
}

impl NonceSlot<'_> {
    /// Locally tracked next nonce, if known
    pub fn cached(&self) -> Option<u64> {
        *self.guard
    }

    /// The node accepted a transaction with `used`
    pub fn commit(mut self, used: u64) {
        *self.guard = Some(used + 1);
    }

    /// Forget the cached value; the next sender refetches from the node
    pub fn invalidate(mut self) {
        *self.guard = None;
    }

    /// Release without changing the cached value (transaction never submitted)
    pub fn release(self) {}
}
