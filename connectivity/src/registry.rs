use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, info, warn};

use ca_shared::{
    CaError, CaResult, DataKind, Endpoint, SecureEndpoint, TransportAdapter,
};

use crate::{
    adapter::{Adapter, AdapterListener, AdapterRecordBuilder, RegistrationError},
    config::SendPolicy,
    monitor::NetworkMonitors,
    network_selection::NetworkSelection,
};

/// Receives what the adapters deliver upward
pub trait PacketSink: Send + Sync {
    fn on_wire_data(&self, endpoint: &SecureEndpoint, data: &[u8]) -> CaResult<()>;

    fn on_send_error(&self, endpoint: &Endpoint, data: &[u8], error: CaError);
}

/// The only component that calls into transport adapters
pub struct AdapterRegistry {
    adapters: Mutex<Vec<Arc<dyn Adapter>>>,
    selection: NetworkSelection,
    policy: SendPolicy,
}

impl AdapterRegistry {
    pub fn new(policy: SendPolicy) -> Self {
        Self {
            adapters: Mutex::new(Vec::new()),
            selection: NetworkSelection::new(),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn Adapter>>> {
        self.adapters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn selection(&self) -> &NetworkSelection {
        &self.selection
    }

    pub fn register(&self, adapter: Arc<dyn Adapter>) -> Result<(), RegistrationError> {
        let transport = adapter.transport();
        if transport.bits().count_ones() != 1 {
            warn!("Rejected adapter registration with transport tag {:?}", transport);
            return Err(RegistrationError::InvalidTransport { transport });
        }
        let mut adapters = self.lock();
        if adapters.iter().any(|a| a.transport() == transport) {
            warn!("Rejected second adapter registration for {:?}", transport);
            return Err(RegistrationError::DuplicateTransport { transport });
        }
        adapters.push(adapter);
        info!("Registered {:?} adapter", transport);
        Ok(())
    }

    /// Registers a closure-based adapter; incomplete records are logged and ignored.
    pub fn register_record(&self, record: AdapterRecordBuilder) -> Result<(), RegistrationError> {
        match record.build() {
            Ok(record) => self.register(Arc::new(record)),
            Err(error) => {
                warn!("Ignoring adapter registration: {}", error);
                Err(error)
            }
        }
    }

    /// Union of every registered transport
    pub fn registered(&self) -> TransportAdapter {
        self.lock()
            .iter()
            .fold(TransportAdapter::empty(), |mask, a| mask | a.transport())
    }

    pub fn is_registered(&self, transport: TransportAdapter) -> bool {
        self.find(transport).is_some()
    }

    fn find(&self, transport: TransportAdapter) -> Option<Arc<dyn Adapter>> {
        self.lock().iter().find(|a| a.transport() == transport).cloned()
    }

    fn all(&self) -> Vec<Arc<dyn Adapter>> {
        self.lock().clone()
    }

    /// Registered adapters that are selected and named by `requested`.
    /// An empty request means every selected transport.
    fn targets(&self, requested: TransportAdapter) -> Vec<Arc<dyn Adapter>> {
        let selected = self.selection.mask();
        let wanted = requested.or_all(selected) & selected;
        self.lock()
            .iter()
            .filter(|a| wanted.contains(a.transport()))
            .cloned()
            .collect()
    }

    pub fn start(&self, transport: TransportAdapter) -> CaResult<()> {
        let adapter = self
            .find(transport)
            .ok_or_else(|| CaError::failed(format!("no adapter registered for {:?}", transport)))?;
        adapter.start_adapter()
    }

    pub fn stop(&self, transport: TransportAdapter) -> CaResult<()> {
        let adapter = self
            .find(transport)
            .ok_or_else(|| CaError::failed(format!("no adapter registered for {:?}", transport)))?;
        adapter.stop_adapter()
    }

    pub fn send_unicast(&self, endpoint: &Endpoint, data: &[u8], kind: DataKind) -> CaResult<usize> {
        self.send_unicast_framed(endpoint, kind, |_| data)
    }

    /// Unicast where each adapter receives the bytes `frame` returns for its
    /// transport, so stream and datagram transports get their own header form.
    pub fn send_unicast_framed<'a>(
        &self,
        endpoint: &Endpoint,
        kind: DataKind,
        frame: impl Fn(TransportAdapter) -> &'a [u8],
    ) -> CaResult<usize> {
        self.fan_out(endpoint, "unicast", frame, |adapter, data| {
            adapter.send_unicast(endpoint, data, kind)
        })
    }

    pub fn send_multicast(&self, endpoint: &Endpoint, data: &[u8], kind: DataKind) -> CaResult<usize> {
        self.fan_out(endpoint, "multicast", |_| data, |adapter, data| {
            adapter.send_multicast(endpoint, data.to_vec(), kind)
        })
    }

    fn fan_out<'a>(
        &self,
        endpoint: &Endpoint,
        label: &str,
        frame: impl Fn(TransportAdapter) -> &'a [u8],
        send: impl Fn(&dyn Adapter, &[u8]) -> CaResult<usize>,
    ) -> CaResult<usize> {
        let targets = self.targets(endpoint.adapter);
        if targets.is_empty() {
            warn!("No selected adapter serves {} send to {}", label, endpoint);
            return Err(CaError::send_failed(format!(
                "no selected adapter serves {:?}",
                endpoint.adapter
            )));
        }
        if targets.iter().any(|adapter| frame(adapter.transport()).is_empty()) {
            return Err(CaError::InvalidParam {
                reason: "empty payload",
            });
        }

        let mut delivered = None;
        let mut last_error = None;
        for adapter in targets {
            let transport = adapter.transport();
            let data = frame(transport);
            let error = match send(adapter.as_ref(), data) {
                Ok(sent) if sent == data.len() => {
                    debug!("{:?} {} send of {} bytes to {}", transport, label, sent, endpoint);
                    delivered.get_or_insert(sent);
                    continue;
                }
                Ok(sent) => CaError::send_failed(format!(
                    "{:?} accepted {} of {} bytes",
                    transport,
                    sent,
                    data.len()
                )),
                Err(error) => error,
            };
            warn!("{:?} {} send to {} failed: {}", transport, label, endpoint, error);
            if self.policy == SendPolicy::AbortOnFirstFailure {
                return Err(error);
            }
            last_error = Some(error);
        }

        match delivered {
            Some(sent) => Ok(sent),
            None => Err(CaError::send_failed(match last_error {
                Some(error) => format!("every adapter failed, last error: {}", error),
                None => "every adapter failed".to_string(),
            })),
        }
    }

    /// Flat list of every adapter's local endpoints. When nothing is found the
    /// last adapter error is reported instead of a generic failure.
    pub fn network_info(&self) -> CaResult<Vec<Endpoint>> {
        let mut results = Vec::new();
        let mut last_error = None;
        for adapter in self.all() {
            match adapter.network_info() {
                Ok(endpoints) => results.push(endpoints),
                Err(error) => {
                    debug!("{:?} network info unavailable: {}", adapter.transport(), error);
                    last_error = Some(error);
                }
            }
        }

        let total: usize = results.iter().map(Vec::len).sum();
        if total == 0 {
            return Err(last_error.unwrap_or_else(|| CaError::failed("no network interface found")));
        }
        let mut endpoints = Vec::with_capacity(total);
        for list in results {
            endpoints.extend(list);
        }
        Ok(endpoints)
    }

    pub fn start_listening(&self) -> CaResult<()> {
        self.any_selected("start listening", |adapter| adapter.start_listening())
    }

    pub fn stop_listening(&self) -> CaResult<()> {
        self.any_selected("stop listening", |adapter| adapter.stop_listening())
    }

    pub fn start_discovery(&self) -> CaResult<()> {
        self.any_selected("start discovery", |adapter| adapter.start_discovery())
    }

    pub fn read_data(&self) -> CaResult<()> {
        self.any_selected("read", |adapter| adapter.read_data())
    }

    /// Succeeds if the operation succeeded on at least one selected adapter.
    fn any_selected(&self, label: &str, operation: impl Fn(&dyn Adapter) -> CaResult<()>) -> CaResult<()> {
        let targets = self.targets(TransportAdapter::empty());
        let mut succeeded = false;
        let mut last_error = None;
        for adapter in targets {
            match operation(adapter.as_ref()) {
                Ok(()) => succeeded = true,
                Err(error) => {
                    warn!("{:?} failed to {}: {}", adapter.transport(), label, error);
                    last_error = Some(error);
                }
            }
        }
        if succeeded {
            Ok(())
        } else {
            Err(last_error.unwrap_or_else(|| CaError::failed(format!("no selected adapter to {}", label))))
        }
    }

    /// Routes a session teardown to the adapter owning the endpoint.
    pub fn disconnect(&self, endpoint: &Endpoint) -> CaResult<()> {
        let adapter = self.find(endpoint.adapter).ok_or(CaError::NotSupported)?;
        adapter.disconnect(endpoint)
    }

    /// Stops every selected adapter
    pub fn stop_selected(&self) {
        for adapter in self.targets(TransportAdapter::empty()) {
            if let Err(error) = adapter.stop_adapter() {
                warn!("{:?} failed to stop: {}", adapter.transport(), error);
            }
        }
    }

    /// Terminates every registered adapter and empties the registry
    pub fn terminate(&self) {
        let adapters = std::mem::take(&mut *self.lock());
        for adapter in adapters {
            adapter.terminate();
        }
        self.selection.clear();
    }
}

/// The listener handed to every adapter; forwards packets to the pipeline
/// and state changes to the network monitors.
pub struct RegistryEvents {
    monitors: Arc<NetworkMonitors>,
    sink: Mutex<Option<Weak<dyn PacketSink>>>,
}

impl RegistryEvents {
    pub fn new(monitors: Arc<NetworkMonitors>) -> Self {
        Self {
            monitors,
            sink: Mutex::new(None),
        }
    }

    pub fn set_sink(&self, sink: Weak<dyn PacketSink>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    fn sink(&self) -> Option<Arc<dyn PacketSink>> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

impl AdapterListener for RegistryEvents {
    fn packet_received(&self, endpoint: &SecureEndpoint, data: &[u8]) {
        let Some(sink) = self.sink() else {
            warn!("Dropping {} bytes from {}: no pipeline attached", data.len(), endpoint.endpoint);
            return;
        };
        if let Err(error) = sink.on_wire_data(endpoint, data) {
            debug!("Inbound data from {} not delivered: {}", endpoint.endpoint, error);
        }
    }

    fn adapter_state_changed(&self, transport: TransportAdapter, enabled: bool) {
        info!("{:?} adapter {}", transport, if enabled { "enabled" } else { "disabled" });
        self.monitors.adapter_state_changed(transport, enabled);
    }

    fn connection_state_changed(&self, endpoint: &Endpoint, connected: bool) {
        info!("{} {}", endpoint, if connected { "connected" } else { "disconnected" });
        self.monitors.connection_state_changed(endpoint, connected);
    }

    fn send_failed(&self, endpoint: &Endpoint, data: &[u8], error: CaError) {
        match self.sink() {
            Some(sink) => sink.on_send_error(endpoint, data, error),
            None => warn!("Send to {} failed with no pipeline attached: {}", endpoint, error),
        }
    }
}
