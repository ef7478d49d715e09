//! The auth module contains [TransactionAuth], which serializes transaction submission for one
//! signing identity.

use ethers::types::Address;
use tokio::sync::{Mutex, MutexGuard};

/// The [TransactionAuth] struct pairs a signing identity with the lock guarding its nonce. Only
/// one transaction per identity may be in flight at a time.
#[derive(Debug)]
pub struct TransactionAuth {
    /// The address transactions are sent from.
    from: Address,
    lock: Mutex<()>,
}

/// A scoped claim on a [TransactionAuth]. The identity is released when the guard is dropped.
#[derive(Debug)]
pub struct AuthGuard<'a> {
    from: Address,
    _guard: MutexGuard<'a, ()>,
}

impl TransactionAuth {
    /// Creates a new [TransactionAuth] for `from`.
    pub fn new(from: Address) -> Self {
        Self {
            from,
            lock: Mutex::new(()),
        }
    }

    /// Returns the signing address.
    pub fn address(&self) -> Address {
        self.from
    }

    /// Waits until no other transaction from this identity is in flight.
    pub async fn acquire(&self) -> AuthGuard<'_> {
        let guard = self.lock.lock().await;
        tracing::trace!(target: "transaction-auth", "Acquired transaction auth for {:?}", self.from);
        AuthGuard {
            from: self.from,
            _guard: guard,
        }
    }
}

impl AuthGuard<'_> {
    /// Returns the signing address.
    pub fn address(&self) -> Address {
        self.from
    }
}
