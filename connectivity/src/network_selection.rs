use std::sync::{Mutex, MutexGuard, PoisonError};

use ca_shared::TransportAdapter;

/// Transports the application has selected, in selection order
#[derive(Default)]
pub struct NetworkSelection {
    selected: Mutex<Vec<TransportAdapter>>,
}

impl NetworkSelection {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TransportAdapter>> {
        self.selected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false if the transport was already selected
    pub fn add(&self, transport: TransportAdapter) -> bool {
        let mut selected = self.lock();
        if selected.contains(&transport) {
            return false;
        }
        selected.push(transport);
        true
    }

    /// Returns false if the transport was not selected
    pub fn remove(&self, transport: TransportAdapter) -> bool {
        let mut selected = self.lock();
        let before = selected.len();
        selected.retain(|t| *t != transport);
        selected.len() != before
    }

    pub fn selected(&self) -> Vec<TransportAdapter> {
        self.lock().clone()
    }

    pub fn mask(&self) -> TransportAdapter {
        self.lock()
            .iter()
            .fold(TransportAdapter::empty(), |mask, transport| mask | *transport)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
