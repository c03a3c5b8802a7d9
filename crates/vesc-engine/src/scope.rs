//! # Serialization Scopes
//!
//! Calls on the same entry, and withdrawals from the same balance bucket,
//! must run one at a time. Calls on different scopes run in parallel.
//!
//! Each scope owns an `Arc<Mutex<()>>` stored in a [`DashMap`]. The `Arc`
//! is cloned out of the map before locking, so a caller waiting on one
//! scope never holds a map shard while it blocks.
//!
//! A scope's entry lives only while someone holds or waits for it: the
//! last guard to drop removes it, so the map does not grow with every
//! request id ever seen.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use vesc_core::{AccountId, BalanceKind, RequestId};
use vesc_ledger::EscrowCall;

/// What a call serializes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    /// All calls targeting one entry.
    Request(RequestId),
    /// Withdrawals from one balance bucket.
    Account(AccountId, BalanceKind),
    /// Calls that touch no entry and no bucket.
    Global,
}

impl ScopeKey {
    /// The scope `call` from an account with `bucket` runs under.
    pub fn of(call: &EscrowCall, account: AccountId, bucket: Option<BalanceKind>) -> Self {
        match (call.request_id(), bucket) {
            (Some(request_id), _) => Self::Request(request_id),
            (None, Some(kind)) => Self::Account(account, kind),
            (None, None) => Self::Global,
        }
    }
}

/// Held while a call runs in its scope.
pub struct ScopeGuard<'a> {
    key: ScopeKey,
    scopes: &'a Scopes,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl ScopeGuard<'_> {
    /// The held scope.
    pub fn key(&self) -> ScopeKey {
        self.key
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        // Unlock first so our own clone of the Arc is gone before the count.
        drop(self.guard.take());
        self.scopes
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Registry of per-scope locks.
#[derive(Default)]
pub struct Scopes {
    locks: DashMap<ScopeKey, Arc<Mutex<()>>>,
}

impl Scopes {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `key` is free, then hold it until the guard drops.
    pub fn enter(&self, key: ScopeKey) -> ScopeGuard<'_> {
        let lock = Arc::clone(self.locks.entry(key).or_default().value());
        ScopeGuard {
            key,
            scopes: self,
            guard: Some(lock.lock_arc()),
        }
    }

    /// Number of scopes currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no scope is held or waited on.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn request(n: u8) -> ScopeKey {
        ScopeKey::Request(RequestId::from_bytes([n; 32]))
    }

    #[test]
    fn same_scope_is_exclusive() {
        let scopes = Arc::new(Scopes::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scopes = Arc::clone(&scopes);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let _guard = scopes.enter(request(1));
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(scopes.is_empty());
    }

    #[test]
    fn released_scopes_are_forgotten() {
        let scopes = Scopes::new();
        for n in 0..1_000u32 {
            let mut bytes = [0u8; 32];
            bytes[..4].copy_from_slice(&n.to_be_bytes());
            let guard = scopes.enter(ScopeKey::Request(RequestId::from_bytes(bytes)));
            assert_eq!(scopes.len(), 1);
            drop(guard);
        }
        assert_eq!(scopes.len(), 0);
    }

    #[test]
    fn waiting_caller_keeps_scope_alive() {
        let scopes = Arc::new(Scopes::new());
        let held = scopes.enter(request(1));
        let waiter = {
            let scopes = Arc::clone(&scopes);
            thread::spawn(move || {
                let _guard = scopes.enter(request(1));
                scopes.len()
            })
        };
        // Give the waiter time to clone the lock out of the map.
        thread::sleep(std::time::Duration::from_millis(50));
        drop(held);
        assert_eq!(waiter.join().unwrap(), 1);
        assert!(scopes.is_empty());
    }

    #[test]
    fn different_scopes_do_not_block() {
        let scopes = Scopes::new();
        let first = scopes.enter(request(1));
        let second = scopes.enter(request(2));
        assert_ne!(first.key(), second.key());
        assert_eq!(scopes.len(), 2);
        drop(first);
        assert_eq!(scopes.len(), 1);
    }

    #[test]
    fn scope_of_call() {
        let user = AccountId::derive("user");
        assert_eq!(
            ScopeKey::of(&EscrowCall::Withdraw, user, Some(BalanceKind::UserRefund)),
            ScopeKey::Account(user, BalanceKind::UserRefund)
        );
        let id = RequestId::from_bytes([3; 32]);
        assert_eq!(
            ScopeKey::of(&EscrowCall::LockFunds { request_id: id }, user, None),
            ScopeKey::Request(id)
        );
        assert_eq!(ScopeKey::of(&EscrowCall::Withdraw, user, None), ScopeKey::Global);
    }
}
