use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use ca_shared::{Endpoint, TransportAdapter};

pub type AdapterStateCallback = Box<dyn Fn(TransportAdapter, bool) + Send + Sync>;
pub type ConnectionStateCallback = Box<dyn Fn(&Endpoint, bool) + Send + Sync>;

/// Handle returned by `register`, used to remove the monitor again
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MonitorId(u64);

struct NetworkMonitor {
    adapter_state: Option<AdapterStateCallback>,
    connection_state: Option<ConnectionStateCallback>,
}

/// Ordered list of network state observers
pub struct NetworkMonitors {
    next_id: AtomicU64,
    monitors: Mutex<Vec<(MonitorId, Arc<NetworkMonitor>)>>,
}

impl NetworkMonitors {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            monitors: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(MonitorId, Arc<NetworkMonitor>)>> {
        self.monitors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(
        &self,
        adapter_state: Option<AdapterStateCallback>,
        connection_state: Option<ConnectionStateCallback>,
    ) -> MonitorId {
        let id = MonitorId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((
            id,
            Arc::new(NetworkMonitor {
                adapter_state,
                connection_state,
            }),
        ));
        id
    }

    pub fn unregister(&self, id: MonitorId) -> bool {
        let mut monitors = self.lock();
        let before = monitors.len();
        monitors.retain(|(monitor_id, _)| *monitor_id != id);
        monitors.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // callbacks run outside the lock so they may register or unregister
    fn snapshot(&self) -> Vec<Arc<NetworkMonitor>> {
        self.lock().iter().map(|(_, monitor)| monitor.clone()).collect()
    }

    pub fn adapter_state_changed(&self, transport: TransportAdapter, enabled: bool) {
        for monitor in self.snapshot() {
            if let Some(callback) = &monitor.adapter_state {
                callback(transport, enabled);
            }
        }
    }

    pub fn connection_state_changed(&self, endpoint: &Endpoint, connected: bool) {
        for monitor in self.snapshot() {
            if let Some(callback) = &monitor.connection_state {
                callback(endpoint, connected);
            }
        }
    }
}

impl Default for NetworkMonitors {
    fn default() -> Self {
        Self::new()
    }
}
