//! Per-name mutual exclusion for release transitions

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{ReleaseError, Result};

#[derive(Clone, Default)]
struct Slot {
    lock: Arc<AsyncMutex<()>>,
    cancel: Arc<AtomicBool>,
}

/// Exclusive guards keyed by release name
///
/// Acquisition never waits: a name that is already held is reported as
/// [`ReleaseError::ConcurrentModification`].
#[derive(Default)]
pub struct ReleaseLocks {
    slots: Mutex<HashMap<String, Slot>>,
}

/// Proof that the holder owns a release name until dropped
pub struct ReleaseGuard {
    name: String,
    cancel: Arc<AtomicBool>,
    _lock: OwnedMutexGuard<()>,
}

impl ReleaseGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cooperative cancellation flag for the guarded transition
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

impl ReleaseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> Result<MutexGuard<'_, HashMap<String, Slot>>> {
        self.slots
            .lock()
            .map_err(|_| ReleaseError::Storage("release lock table poisoned".to_string()))
    }

    /// Slot for `name`, created on demand
    ///
    /// Slots nobody holds or waits on are dropped first, so the table only
    /// grows with concurrent activity.
    fn slot(&self, name: &str) -> Result<Slot> {
        let mut slots = self.table()?;
        slots.retain(|_, slot| Arc::strong_count(&slot.lock) > 1);
        Ok(slots.entry(name.to_string()).or_default().clone())
    }

    fn existing(&self, name: &str) -> Option<Slot> {
        self.table().ok()?.get(name).cloned()
    }

    /// Take the guard for `name`, failing when another transition holds it
    pub fn try_acquire(&self, name: &str) -> Result<ReleaseGuard> {
        let slot = self.slot(name)?;
        let lock = slot
            .lock
            .try_lock_owned()
            .map_err(|_| ReleaseError::ConcurrentModification {
                name: name.to_string(),
            })?;
        slot.cancel.store(false, Ordering::SeqCst);

        Ok(ReleaseGuard {
            name: name.to_string(),
            cancel: slot.cancel,
            _lock: lock,
        })
    }

    /// Whether a transition currently holds `name`
    pub fn is_busy(&self, name: &str) -> bool {
        self.existing(name)
            .is_some_and(|slot| slot.lock.try_lock().is_err())
    }

    /// Flag the transition holding `name` for cancellation
    ///
    /// Returns false when nothing holds the name.
    pub fn cancel(&self, name: &str) -> bool {
        let Some(slot) = self.existing(name) else {
            return false;
        };
        if slot.lock.try_lock().is_ok() {
            return false;
        }
        slot.cancel.store(true, Ordering::SeqCst);
        true
    }

    /// Wait until no transition holds `name`
    pub async fn wait_idle(&self, name: &str) -> Result<()> {
        if let Some(slot) = self.existing(name) {
            let _released = slot.lock.lock().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected() {
        let locks = ReleaseLocks::new();
        let guard = locks.try_acquire("ticktock").unwrap();
        assert_eq!(guard.name(), "ticktock");

        assert!(matches!(
            locks.try_acquire("ticktock"),
            Err(ReleaseError::ConcurrentModification { name }) if name == "ticktock"
        ));
        assert!(locks.try_acquire("other").is_ok());
        assert!(locks.is_busy("ticktock"));

        drop(guard);
        assert!(!locks.is_busy("ticktock"));
        assert!(locks.try_acquire("ticktock").is_ok());
    }

    #[test]
    fn test_cancel_only_flags_held_names() {
        let locks = ReleaseLocks::new();
        assert!(!locks.cancel("ticktock"));

        let guard = locks.try_acquire("ticktock").unwrap();
        assert!(!guard.is_cancelled());
        assert!(locks.cancel("ticktock"));
        assert!(guard.is_cancelled());

        drop(guard);
        let guard = locks.try_acquire("ticktock").unwrap();
        assert!(!guard.is_cancelled());
    }

    #[test]
    fn test_idle_slots_are_pruned() {
        let locks = ReleaseLocks::new();
        assert!(!locks.is_busy("never-held"));
        assert!(!locks.cancel("never-held"));
        assert!(locks.slots.lock().unwrap().is_empty());

        drop(locks.try_acquire("first").unwrap());
        let held = locks.try_acquire("second").unwrap();
        let slots = locks.slots.lock().unwrap();
        assert_eq!(slots.len(), 1);
        assert!(slots.contains_key("second"));
        drop(slots);
        drop(held);
    }

    #[tokio::test]
    async fn test_wait_idle() {
        let locks = Arc::new(ReleaseLocks::new());
        let guard = locks.try_acquire("ticktock").unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.wait_idle("ticktock").await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap().unwrap();
    }
}
