//! Process-wide, non-blocking publish serializer (C6, spec.md §4.6).
//!
//! Grounded on `server::util::lock_then_release`, but inverted: the teacher
//! blocks until the storage mutex is acquired, retrying every 10ms. A
//! publish instead needs the opposite — fail immediately on contention so
//! the caller can retry — so this uses `Mutex::try_lock` and never sleeps.

use std::sync::{Mutex, TryLockError};

use crate::error::BrokerError;

/// State machine for a single publish attempt (spec.md §4.6). Tracked only
/// for logging; the guard's `Drop` always performs the `Released` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Validating,
    Appending,
    Released,
}

pub struct PublishSerializer {
    lock: Mutex<()>,
}

impl Default for PublishSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishSerializer {
    pub fn new() -> Self {
        PublishSerializer { lock: Mutex::new(()) }
    }

    /// Attempt to acquire the serializer without blocking. Fails immediately
    /// with `LockBusy` if another publish is already in flight, instead of
    /// the teacher's block-and-retry behaviour.
    pub fn try_acquire(&self) -> Result<PublishGuard<'_>, BrokerError> {
        match self.lock.try_lock() {
            Ok(guard) => {
                log::trace!("publish serializer acquired");
                Ok(PublishGuard {
                    _guard: guard,
                    state: PublishState::Validating,
                })
            }
            // A prior holder panicked mid-publish; the lock is inert data,
            // so recovering it is safe and keeps the serializer usable.
            Err(TryLockError::Poisoned(poisoned)) => {
                log::warn!("publish serializer was poisoned by a prior panic, recovering");
                Ok(PublishGuard {
                    _guard: poisoned.into_inner(),
                    state: PublishState::Validating,
                })
            }
            Err(TryLockError::WouldBlock) => {
                log::debug!("publish serializer busy");
                Err(BrokerError::LockBusy)
            }
        }
    }
}

/// Held for the lifetime of one publish attempt. `advance` records progress
/// through Validating -> Appending; `Drop` always runs the Released step,
/// regardless of which exit path was taken.
pub struct PublishGuard<'a> {
    _guard: std::sync::MutexGuard<'a, ()>,
    state: PublishState,
}

impl PublishGuard<'_> {
    pub fn advance(&mut self, state: PublishState) {
        self.state = state;
    }

    pub fn state(&self) -> PublishState {
        self.state
    }
}

impl Drop for PublishGuard<'_> {
    fn drop(&mut self) {
        self.state = PublishState::Released;
        log::trace!("publish serializer released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_concurrent_acquire_fails_with_lock_busy() {
        let serializer = PublishSerializer::new();
        let first = serializer.try_acquire().unwrap();

        let second = serializer.try_acquire();
        assert_eq!(second.unwrap_err(), BrokerError::LockBusy);

        drop(first);
        assert!(serializer.try_acquire().is_ok());
    }
}
