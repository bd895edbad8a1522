// src/session/ownership.rs

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::common::{error::GoIoError, timing};

// --- Thread ownership ---

/// Capability returned by [`OwnershipLock::lock`]: proof that one thread owns a session.
///
/// A token stays valid until its thread unlocks; a later acquisition by any thread starts a new
/// generation and invalidates older tokens.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OwnerToken {
    thread: ThreadId,
    generation: u64,
}

impl OwnerToken {
    pub fn thread(&self) -> ThreadId {
        self.thread
    }
}

#[derive(Debug, Default)]
struct OwnerState {
    owner: Option<ThreadId>,
    generation: u64,
}

/// Cooperative single-owner lock keyed by thread id.
///
/// Unlike a mutex guard, ownership is not tied to a scope: it is transferred only by an
/// explicit `unlock()` from the owner followed by `lock()` from another thread.
#[derive(Debug, Default)]
pub struct OwnershipLock {
    state: Mutex<OwnerState>,
    released: Condvar,
}

impl OwnershipLock {
    /// Lock already held by the calling thread.
    pub fn owned_by_current() -> Self {
        OwnershipLock {
            state: Mutex::new(OwnerState { owner: Some(thread::current().id()), generation: 1 }),
            released: Condvar::new(),
        }
    }

    /// Acquires ownership for the calling thread.
    ///
    /// # Returns
    ///
    /// * `Ok(token)` if the lock was free or already held by the caller.
    /// * `Err(GoIoError::AlreadyLocked)` if another thread holds it and `timeout` is zero.
    /// * `Err(GoIoError::Timeout)` if another thread still holds it after `timeout`.
    pub fn lock(&self, timeout: Duration) -> Result<OwnerToken, GoIoError> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            return Ok(OwnerToken { thread: me, generation: state.generation });
        }
        // `None` waits without a bound
        let deadline = timing::deadline_after(timeout);
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.generation += 1;
                    return Ok(OwnerToken { thread: me, generation: state.generation });
                }
                Some(_) if timeout.is_zero() => return Err(GoIoError::AlreadyLocked),
                Some(_) => match deadline {
                    Some(_) if timing::expired(deadline) => return Err(GoIoError::Timeout),
                    Some(at) => {
                        self.released.wait_until(&mut state, at);
                    }
                    None => self.released.wait(&mut state),
                },
            }
        }
    }

    /// Releases ownership held by the calling thread.
    pub fn unlock(&self) -> Result<(), GoIoError> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) {
            return Err(GoIoError::NotOwner);
        }
        state.owner = None;
        drop(state);
        self.released.notify_all();
        Ok(())
    }

    /// Token of the calling thread, if it is the owner.
    pub fn current_token(&self) -> Option<OwnerToken> {
        let me = thread::current().id();
        let state = self.state.lock();
        (state.owner == Some(me)).then_some(OwnerToken { thread: me, generation: state.generation })
    }

    /// Fails with `OwnershipViolation` unless the calling thread owns the lock. Never waits.
    pub fn ensure_owner(&self) -> Result<OwnerToken, GoIoError> {
        self.current_token().ok_or(GoIoError::OwnershipViolation)
    }

    /// Whether `token` still proves ownership for the calling thread.
    pub fn is_valid(&self, token: &OwnerToken) -> bool {
        self.current_token().as_ref() == Some(token)
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }
}

// --- Open device registry ---

/// Set of device names currently bound to an open session.
#[derive(Debug, Clone, Default)]
pub struct OpenRegistry {
    names: Arc<Mutex<HashSet<String>>>,
}

impl OpenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `name`; `None` if it is already claimed.
    pub fn register(&self, name: &str) -> Option<NameRegistration> {
        if !self.names.lock().insert(name.to_owned()) {
            return None;
        }
        Some(NameRegistration { registry: self.clone(), name: name.to_owned() })
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.names.lock().contains(name)
    }

    pub fn open_count(&self) -> usize {
        self.names.lock().len()
    }
}

/// Claim on a device name; released when dropped.
#[derive(Debug)]
pub struct NameRegistration {
    registry: OpenRegistry,
    name: String,
}

impl Drop for NameRegistration {
    fn drop(&mut self) {
        self.registry.names.lock().remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_creator_owns_initially() {
        let lock = OwnershipLock::owned_by_current();
        assert!(lock.ensure_owner().is_ok());
        let token = lock.lock(Duration::ZERO).unwrap();
        assert!(lock.is_valid(&token));
        assert_eq!(token.thread(), thread::current().id());
    }

    #[test]
    fn test_lock_transfer_between_threads() {
        let lock = Arc::new(OwnershipLock::owned_by_current());
        lock.unlock().unwrap();
        assert_eq!(lock.owner(), None);

        let other = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            let token = other.lock(Duration::ZERO).unwrap();
            assert!(other.ensure_owner().is_ok());
            other.unlock().unwrap();
            token
        });
        let their_token = handle.join().unwrap();

        let mine = lock.lock(Duration::ZERO).unwrap();
        assert!(!lock.is_valid(&their_token));
        assert!(lock.is_valid(&mine));
    }

    #[test]
    fn test_contention_already_locked_and_timeout() {
        let lock = Arc::new(OwnershipLock::owned_by_current());
        let other = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            let immediate = other.lock(Duration::ZERO);
            let waited = other.lock(Duration::from_millis(30));
            let violation = other.ensure_owner();
            let not_owner = other.unlock();
            (immediate, waited, violation, not_owner)
        });
        let (immediate, waited, violation, not_owner) = handle.join().unwrap();
        assert!(matches!(immediate, Err(GoIoError::AlreadyLocked)));
        assert!(matches!(waited, Err(GoIoError::Timeout)));
        assert!(matches!(violation, Err(GoIoError::OwnershipViolation)));
        assert!(matches!(not_owner, Err(GoIoError::NotOwner)));
    }

    #[test]
    fn test_waiting_lock_acquires_after_unlock() {
        let lock = Arc::new(OwnershipLock::owned_by_current());
        let other = Arc::clone(&lock);
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            tx.send(()).unwrap();
            other.lock(Duration::from_secs(5)).is_ok()
        });
        rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        lock.unlock().unwrap();
        assert!(handle.join().unwrap());
        assert!(matches!(lock.ensure_owner(), Err(GoIoError::OwnershipViolation)));
    }

    #[test]
    fn test_unbounded_timeout() {
        let lock = Arc::new(OwnershipLock::owned_by_current());
        let token = lock.lock(Duration::MAX).unwrap();
        assert!(lock.is_valid(&token));

        let other = Arc::clone(&lock);
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            tx.send(()).unwrap();
            other.lock(Duration::MAX).is_ok()
        });
        rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        lock.unlock().unwrap();
        assert!(handle.join().unwrap());
        assert!(!lock.is_valid(&token));
    }

    #[test]
    fn test_registry_claims_and_releases() {
        let registry = OpenRegistry::new();
        let claim = registry.register("dev0").unwrap();
        assert!(registry.is_open("dev0"));
        assert!(registry.register("dev0").is_none());
        assert_eq!(registry.open_count(), 1);
        drop(claim);
        assert!(!registry.is_open("dev0"));
        assert!(registry.register("dev0").is_some());
    }
}
