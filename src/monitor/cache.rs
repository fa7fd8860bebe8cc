use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::persistence::{JobStore, StoreError};

use super::MonitorAction;

/// Process-wide, read-mostly copy of the monitor definitions. Loaded lazily
/// on first use; [`MonitorCache::reload`] swaps the whole set at once, so a
/// dispatch in progress keeps the snapshot it started with.
#[derive(Clone)]
pub struct MonitorCache {
    store: Arc<dyn JobStore>,
    monitors: Arc<RwLock<Option<Arc<Vec<MonitorAction>>>>>,
}

impl MonitorCache {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            monitors: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn monitors(&self) -> Result<Arc<Vec<MonitorAction>>, StoreError> {
        if let Some(monitors) = self.monitors.read().await.as_ref() {
            return Ok(monitors.clone());
        }

        let mut slot = self.monitors.write().await;
        // Another caller may have loaded while we waited for the write lock
        if let Some(monitors) = slot.as_ref() {
            return Ok(monitors.clone());
        }

        let loaded = Arc::new(self.store.get_monitor_data().await?);
        info!("🔔 Loaded {} monitor(s)", loaded.len());
        *slot = Some(loaded.clone());
        Ok(loaded)
    }

    /// Re-reads every monitor from the store. On error the previous set is
    /// kept.
    pub async fn reload(&self) -> Result<usize, StoreError> {
        let loaded = Arc::new(self.store.get_monitor_data().await?);
        let count = loaded.len();
        *self.monitors.write().await = Some(loaded);
        debug!("🔔 Reloaded {} monitor(s)", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MonitorEvent;
    use crate::persistence::MemoryStore;

    fn monitor(id: i32) -> MonitorAction {
        MonitorAction::new(id, format!("monitor {id}"), MonitorEvent::ExecutionFail, "log")
    }

    #[tokio::test]
    async fn test_first_use_loads_and_later_changes_need_reload() {
        let store = MemoryStore::new().with_monitors(vec![monitor(1)]);
        let cache = MonitorCache::new(Arc::new(store.clone()));

        assert_eq!(cache.monitors().await.unwrap().len(), 1);

        store.set_monitors(vec![monitor(1), monitor(2)]);
        assert_eq!(cache.monitors().await.unwrap().len(), 1);

        assert_eq!(cache.reload().await.unwrap(), 2);
        assert_eq!(cache.monitors().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reload() {
        let store = MemoryStore::new().with_monitors(vec![monitor(1)]);
        let cache = MonitorCache::new(Arc::new(store.clone()));

        let snapshot = cache.monitors().await.unwrap();
        store.set_monitors(Vec::new());
        cache.reload().await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(cache.monitors().await.unwrap().is_empty());
    }
}
