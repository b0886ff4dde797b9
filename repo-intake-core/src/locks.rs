use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::name::ArtifactName;

type Slots = HashMap<String, Arc<AsyncMutex<()>>>;

/// One async mutex per repository name, created on demand and dropped once
/// nobody holds or waits for it.
#[derive(Debug, Default)]
pub struct NameLocks {
    slots: Mutex<Slots>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other ingestion holds `name`.
    pub async fn acquire(self: &Arc<Self>, name: &ArtifactName) -> NameLease {
        let slot = self.slot(name);
        let guard = slot.lock_owned().await;
        self.lease(name, guard)
    }

    /// Take `name` only if it is free right now.
    pub fn try_acquire(self: &Arc<Self>, name: &ArtifactName) -> Option<NameLease> {
        let slot = self.slot(name);
        match Arc::clone(&slot).try_lock_owned() {
            Ok(guard) => Some(self.lease(name, guard)),
            Err(_) => {
                drop(slot);
                self.prune(name.as_str());
                None
            }
        }
    }

    /// Number of names currently held or awaited.
    pub fn active(&self) -> usize {
        self.slots().len()
    }

    fn lease(self: &Arc<Self>, name: &ArtifactName, guard: OwnedMutexGuard<()>) -> NameLease {
        NameLease {
            locks: Arc::clone(self),
            name: name.to_string(),
            guard: Some(guard),
        }
    }

    fn slot(&self, name: &ArtifactName) -> Arc<AsyncMutex<()>> {
        self.slots()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn prune(&self, name: &str) {
        let mut slots = self.slots();
        if slots.get(name).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(name);
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exclusive claim on one repository name; released on drop.
///
/// The lease owns a handle to its registry, so it can move into a spawned
/// task and outlive the call that claimed it.
#[derive(Debug)]
pub struct NameLease {
    locks: Arc<NameLocks>,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl NameLease {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NameLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.prune(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_are_pruned_after_release() {
        let locks = Arc::new(NameLocks::new());
        let name = ArtifactName::parse("demo").unwrap();
        {
            let _lease = locks.acquire(&name).await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn try_acquire_fails_while_held() {
        let locks = Arc::new(NameLocks::new());
        let name = ArtifactName::parse("demo").unwrap();
        let other = ArtifactName::parse("other").unwrap();

        let lease = locks.acquire(&name).await;
        assert!(locks.try_acquire(&name).is_none());
        assert!(locks.try_acquire(&other).is_some());
        drop(lease);
        assert!(locks.try_acquire(&name).is_some());
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn lease_moves_into_spawned_task() {
        let locks = Arc::new(NameLocks::new());
        let name = ArtifactName::parse("demo").unwrap();

        let lease = locks.acquire(&name).await;
        let (release, released) = tokio::sync::oneshot::channel::<()>();
        let holder = tokio::spawn(async move {
            let _lease = lease;
            let _ = released.await;
        });

        assert!(locks.try_acquire(&name).is_none());
        release.send(()).unwrap();
        holder.await.unwrap();
        assert!(locks.try_acquire(&name).is_some());
        assert_eq!(locks.active(), 0);
    }
}
