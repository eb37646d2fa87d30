//! Striped per-account locks.
//!
//! Every guarded write (account version, order status, idempotency revision)
//! belongs to exactly one user, so holding that user's stripe while checking
//! guards and applying the write makes the write atomic with respect to every
//! other writer for the same account. Distinct accounts usually land on
//! distinct stripes and never wait on a shared lock.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use credit_ledger_core::UserId;
use parking_lot::{Mutex, MutexGuard};

/// Number of lock stripes.
pub const STRIPES: usize = 64;

/// A fixed set of mutexes indexed by a hash of the user ID.
pub struct AccountLocks {
    stripes: Vec<Mutex<()>>,
}

impl AccountLocks {
    /// Create the lock table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Lock the stripe owning `user_id`.
    pub fn lock(&self, user_id: &UserId) -> MutexGuard<'_, ()> {
        self.stripes[Self::stripe_of(user_id)].lock()
    }

    fn stripe_of(user_id: &UserId) -> usize {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        // Truncation is fine, only the low bits select the stripe.
        #[allow(clippy::cast_possible_truncation)]
        let index = hasher.finish() as usize;
        index % STRIPES
    }
}

impl Default for AccountLocks {
    fn default() -> Self {
        Self::new()
    }
}
