use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::join_all;
use tracing::info;

use crate::transport::Transport;

/// Named, process-wide set of transports.
///
/// Shutdown code calls [`close_all`](Self::close_all) once instead of
/// tracking every transport it created.
#[derive(Debug, Default)]
pub struct TransportRegistry {
    transports: Mutex<BTreeMap<String, Arc<Transport>>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `transport` under `name`. A transport already registered
    /// under that name is returned; stopping it is up to the caller.
    pub fn register(
        &self,
        name: impl Into<String>,
        transport: Arc<Transport>,
    ) -> Option<Arc<Transport>> {
        self.lock().insert(name.into(), transport)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Transport>> {
        self.lock().get(name).cloned()
    }

    /// Unregister without stopping.
    pub fn remove(&self, name: &str) -> Option<Arc<Transport>> {
        self.lock().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Unregister and stop every transport concurrently. Returns how many
    /// were stopped.
    pub async fn close_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.lock());
        let count = drained.len();
        join_all(drained.values().map(|transport| transport.stop())).await;
        if count > 0 {
            info!(count, "closed all transports");
        }
        count
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<Transport>>> {
        self.transports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use telelink_transport::MemoryConnector;

    use super::*;
    use crate::config::TransportConfig;

    fn transport(memory: &MemoryConnector, domain: &str) -> Arc<Transport> {
        let (transport, _rx) =
            Transport::new(TransportConfig::for_domain(domain), Arc::new(memory.clone())).unwrap();
        Arc::new(transport)
    }

    #[tokio::test(start_paused = true)]
    async fn close_all_stops_everything() {
        let memory = MemoryConnector::new();
        let registry = TransportRegistry::new();
        let a = transport(&memory, "a.local");
        let b = transport(&memory, "b.local");
        a.start().unwrap();
        b.start().unwrap();
        registry.register("a", Arc::clone(&a));
        registry.register("b", Arc::clone(&b));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(a.is_connected() && b.is_connected());

        assert_eq!(registry.close_all().await, 2);
        assert!(registry.is_empty());
        assert!(!a.is_connected() && !a.timers_active());
        assert!(!b.is_connected() && !b.timers_active());
        assert_eq!(registry.close_all().await, 0);
    }

    #[tokio::test]
    async fn register_replaces_and_returns_previous() {
        let memory = MemoryConnector::new();
        let registry = TransportRegistry::new();
        let first = transport(&memory, "one.local");
        let second = transport(&memory, "two.local");

        assert!(registry.register("robot", Arc::clone(&first)).is_none());
        let previous = registry.register("robot", Arc::clone(&second)).unwrap();
        assert!(Arc::ptr_eq(&previous, &first));
        assert_eq!(registry.names(), vec!["robot".to_string()]);
        assert!(Arc::ptr_eq(&registry.get("robot").unwrap(), &second));

        assert!(registry.remove("robot").is_some());
        assert!(registry.get("robot").is_none());
        assert_eq!(registry.len(), 0);
    }
}
