use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct UpdateId(u64);

/// Something that wants to be called periodically. Endpoints use this to re-send unacknowledged
///  packets.
#[async_trait]
pub trait Updatable: Send + Sync + 'static {
    async fn update(&self);

    /// Expired updatables are never called again, and [Updater] drops them on its next tick.
    fn is_expired(&self) -> bool {
        false
    }
}

/// The host application's periodic tick (e.g. its per-frame update). Endpoints register when they
///  start and deregister when they are closed; the cadence is entirely up to the tick source.
pub trait TickSource: Send + Sync {
    fn add_update(&self, updatable: Arc<dyn Updatable>) -> UpdateId;

    fn remove_update(&self, id: UpdateId);
}

/// A minimal [TickSource]: [Updater::tick] calls all registered updatables in registration order.
///  Applications with their own frame loop call `tick` from there, others can use
///  [Updater::spawn_periodic].
#[derive(Default)]
pub struct Updater {
    next_id: AtomicU64,
    updates: Mutex<BTreeMap<UpdateId, Arc<dyn Updatable>>>,
}

impl TickSource for Updater {
    fn add_update(&self, updatable: Arc<dyn Updatable>) -> UpdateId {
        let id = UpdateId(self.next_id.fetch_add(1, Ordering::AcqRel));
        self.updates.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, updatable);
        id
    }

    fn remove_update(&self, id: UpdateId) {
        self.updates.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

impl Updater {
    pub fn new() -> Updater {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.updates.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn tick(&self) {
        // snapshot, so updatables can (de)register without deadlocking
        let updates = {
            let mut updates = self.updates.lock()
                .unwrap_or_else(PoisonError::into_inner);
            updates.retain(|_, u| !u.is_expired());
            updates.values()
                .cloned()
                .collect::<Vec<_>>()
        };

        trace!("tick: {} updatable(s)", updates.len());
        for u in updates {
            u.update().await;
        }
    }

    /// Calls [Updater::tick] at a fixed interval until the returned handle is aborted. Ticks that
    ///  are missed because an update took too long are skipped rather than bunched up.
    pub fn spawn_periodic(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let updater = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                updater.tick().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Default)]
    struct CountingUpdatable {
        count: AtomicUsize,
        expired: AtomicBool,
    }

    #[async_trait]
    impl Updatable for CountingUpdatable {
        async fn update(&self) {
            self.count.fetch_add(1, Ordering::AcqRel);
        }

        fn is_expired(&self) -> bool {
            self.expired.load(Ordering::Acquire)
        }
    }

    #[tokio::test]
    async fn test_add_tick_remove() {
        let updater = Updater::new();
        let a = Arc::new(CountingUpdatable::default());
        let b = Arc::new(CountingUpdatable::default());

        let id_a = updater.add_update(a.clone());
        let id_b = updater.add_update(b.clone());
        assert_ne!(id_a, id_b);
        assert_eq!(updater.len(), 2);

        updater.tick().await;
        updater.tick().await;
        updater.remove_update(id_a);
        updater.tick().await;

        assert_eq!(a.count.load(Ordering::Acquire), 2);
        assert_eq!(b.count.load(Ordering::Acquire), 3);

        updater.remove_update(id_b);
        updater.remove_update(id_b);
        assert!(updater.is_empty());
    }

    #[tokio::test]
    async fn test_expired_updatable_is_dropped() {
        let updater = Updater::new();
        let a = Arc::new(CountingUpdatable::default());
        let b = Arc::new(CountingUpdatable::default());
        updater.add_update(a.clone());
        updater.add_update(b.clone());

        updater.tick().await;
        a.expired.store(true, Ordering::Release);
        updater.tick().await;

        assert_eq!(a.count.load(Ordering::Acquire), 1);
        assert_eq!(b.count.load(Ordering::Acquire), 2);
        assert_eq!(updater.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_periodic() {
        let updater = Arc::new(Updater::new());
        let counter = Arc::new(CountingUpdatable::default());
        updater.add_update(counter.clone());

        let handle = updater.spawn_periodic(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(35)).await;
        handle.abort();

        // first tick is immediate, then at 10, 20 and 30 millis
        assert_eq!(counter.count.load(Ordering::Acquire), 4);
    }
}
