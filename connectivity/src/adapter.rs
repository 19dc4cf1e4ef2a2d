use std::sync::Arc;

use thiserror::Error;

use ca_shared::{CaError, CaResult, DataKind, Endpoint, SecureEndpoint, TransportAdapter};

use crate::{collaborators::SecureSessionHandler, config::ConnectivityConfig};

/// Capabilities every transport adapter provides to the registry
pub trait Adapter: Send + Sync {
    /// The single transport this adapter serves
    fn transport(&self) -> TransportAdapter;

    fn start_adapter(&self) -> CaResult<()>;
    fn stop_adapter(&self) -> CaResult<()>;
    fn start_listening(&self) -> CaResult<()>;
    fn stop_listening(&self) -> CaResult<()>;
    fn start_discovery(&self) -> CaResult<()>;

    /// Sends to one peer, returning the number of bytes accepted
    fn send_unicast(&self, endpoint: &Endpoint, data: &[u8], kind: DataKind) -> CaResult<usize>;

    /// Sends to the transport's multicast group. The adapter owns its copy
    /// of the payload.
    fn send_multicast(&self, endpoint: &Endpoint, data: Vec<u8>, kind: DataKind) -> CaResult<usize>;

    /// Local interfaces this adapter is reachable on
    fn network_info(&self) -> CaResult<Vec<Endpoint>>;

    /// Synchronous read, only meaningful for polled builds
    fn read_data(&self) -> CaResult<()>;

    fn terminate(&self);

    /// Drops the session bound to `endpoint`, for connection-oriented transports
    fn disconnect(&self, _endpoint: &Endpoint) -> CaResult<()> {
        Err(CaError::NotSupported)
    }
}

/// Events an adapter reports upward to the registry
pub trait AdapterListener: Send + Sync {
    /// A complete message arrived from `endpoint`
    fn packet_received(&self, endpoint: &SecureEndpoint, data: &[u8]);

    fn adapter_state_changed(&self, transport: TransportAdapter, enabled: bool);

    fn connection_state_changed(&self, endpoint: &Endpoint, connected: bool);

    /// A send that was already accepted failed on the adapter's own worker
    fn send_failed(&self, endpoint: &Endpoint, data: &[u8], error: CaError);
}

/// Everything an adapter receives when it is constructed
#[derive(Clone)]
pub struct AdapterContext {
    pub listener: Arc<dyn AdapterListener>,
    pub security: Option<Arc<dyn SecureSessionHandler>>,
    pub config: ConnectivityConfig,
}

/// Deferred construction of an adapter, run during `initialize()`
pub trait AdapterFactory: Send {
    fn build(self: Box<Self>, context: &AdapterContext) -> CaResult<Arc<dyn Adapter>>;
}

impl<F> AdapterFactory for F
where
    F: FnOnce(&AdapterContext) -> CaResult<Arc<dyn Adapter>> + Send,
{
    fn build(self: Box<Self>, context: &AdapterContext) -> CaResult<Arc<dyn Adapter>> {
        (*self)(context)
    }
}

/// Errors that can occur when registering an adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// Record is missing a required capability
    #[error("Adapter record for {transport:?} is missing the '{capability}' capability")]
    MissingCapability {
        transport: TransportAdapter,
        capability: &'static str,
    },

    /// Transport tag is empty or names more than one transport
    #[error("Adapter transport tag {transport:?} must name exactly one transport")]
    InvalidTransport { transport: TransportAdapter },

    /// An adapter for the same transport is already registered
    #[error("An adapter for {transport:?} is already registered")]
    DuplicateTransport { transport: TransportAdapter },
}

impl From<RegistrationError> for CaError {
    fn from(_: RegistrationError) -> Self {
        CaError::InvalidParam {
            reason: "incomplete or conflicting adapter registration",
        }
    }
}

type LifecycleFn = Box<dyn Fn() -> CaResult<()> + Send + Sync>;
type UnicastFn = Box<dyn Fn(&Endpoint, &[u8], DataKind) -> CaResult<usize> + Send + Sync>;
type MulticastFn = Box<dyn Fn(&Endpoint, Vec<u8>, DataKind) -> CaResult<usize> + Send + Sync>;
type NetworkInfoFn = Box<dyn Fn() -> CaResult<Vec<Endpoint>> + Send + Sync>;
type TerminateFn = Box<dyn Fn() + Send + Sync>;

/// Assembles an adapter out of individual capability closures.
///
/// `build()` refuses a record that lacks any capability except `read_data`,
/// which defaults to a no-op since only polled builds use it.
pub struct AdapterRecordBuilder {
    transport: TransportAdapter,
    start_adapter: Option<LifecycleFn>,
    stop_adapter: Option<LifecycleFn>,
    start_listening: Option<LifecycleFn>,
    stop_listening: Option<LifecycleFn>,
    start_discovery: Option<LifecycleFn>,
    send_unicast: Option<UnicastFn>,
    send_multicast: Option<MulticastFn>,
    network_info: Option<NetworkInfoFn>,
    read_data: Option<LifecycleFn>,
    terminate: Option<TerminateFn>,
}

impl AdapterRecordBuilder {
    pub fn new(transport: TransportAdapter) -> Self {
        Self {
            transport,
            start_adapter: None,
            stop_adapter: None,
            start_listening: None,
            stop_listening: None,
            start_discovery: None,
            send_unicast: None,
            send_multicast: None,
            network_info: None,
            read_data: None,
            terminate: None,
        }
    }

    pub fn start_adapter(mut self, f: impl Fn() -> CaResult<()> + Send + Sync + 'static) -> Self {
        self.start_adapter = Some(Box::new(f));
        self
    }

    pub fn stop_adapter(mut self, f: impl Fn() -> CaResult<()> + Send + Sync + 'static) -> Self {
        self.stop_adapter = Some(Box::new(f));
        self
    }

    pub fn start_listening(mut self, f: impl Fn() -> CaResult<()> + Send + Sync + 'static) -> Self {
        self.start_listening = Some(Box::new(f));
        self
    }

    pub fn stop_listening(mut self, f: impl Fn() -> CaResult<()> + Send + Sync + 'static) -> Self {
        self.stop_listening = Some(Box::new(f));
        self
    }

    pub fn start_discovery(mut self, f: impl Fn() -> CaResult<()> + Send + Sync + 'static) -> Self {
        self.start_discovery = Some(Box::new(f));
        self
    }

    pub fn send_unicast(
        mut self,
        f: impl Fn(&Endpoint, &[u8], DataKind) -> CaResult<usize> + Send + Sync + 'static,
    ) -> Self {
        self.send_unicast = Some(Box::new(f));
        self
    }

    pub fn send_multicast(
        mut self,
        f: impl Fn(&Endpoint, Vec<u8>, DataKind) -> CaResult<usize> + Send + Sync + 'static,
    ) -> Self {
        self.send_multicast = Some(Box::new(f));
        self
    }

    pub fn network_info(
        mut self,
        f: impl Fn() -> CaResult<Vec<Endpoint>> + Send + Sync + 'static,
    ) -> Self {
        self.network_info = Some(Box::new(f));
        self
    }

    pub fn read_data(mut self, f: impl Fn() -> CaResult<()> + Send + Sync + 'static) -> Self {
        self.read_data = Some(Box::new(f));
        self
    }

    pub fn terminate(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.terminate = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Result<AdapterRecord, RegistrationError> {
        let transport = self.transport;
        if transport.bits().count_ones() != 1 {
            return Err(RegistrationError::InvalidTransport { transport });
        }
        let missing = |capability: &'static str| RegistrationError::MissingCapability {
            transport,
            capability,
        };

        Ok(AdapterRecord {
            transport,
            start_adapter: self.start_adapter.ok_or_else(|| missing("start_adapter"))?,
            stop_adapter: self.stop_adapter.ok_or_else(|| missing("stop_adapter"))?,
            start_listening: self.start_listening.ok_or_else(|| missing("start_listening"))?,
            stop_listening: self.stop_listening.ok_or_else(|| missing("stop_listening"))?,
            start_discovery: self.start_discovery.ok_or_else(|| missing("start_discovery"))?,
            send_unicast: self.send_unicast.ok_or_else(|| missing("send_unicast"))?,
            send_multicast: self.send_multicast.ok_or_else(|| missing("send_multicast"))?,
            network_info: self.network_info.ok_or_else(|| missing("network_info"))?,
            read_data: self.read_data.unwrap_or_else(|| Box::new(|| Ok(()))),
            terminate: self.terminate.ok_or_else(|| missing("terminate"))?,
        })
    }
}

/// A fully populated closure-based adapter
pub struct AdapterRecord {
    transport: TransportAdapter,
    start_adapter: LifecycleFn,
    stop_adapter: LifecycleFn,
    start_listening: LifecycleFn,
    stop_listening: LifecycleFn,
    start_discovery: LifecycleFn,
    send_unicast: UnicastFn,
    send_multicast: MulticastFn,
    network_info: NetworkInfoFn,
    read_data: LifecycleFn,
    terminate: TerminateFn,
}

impl Adapter for AdapterRecord {
    fn transport(&self) -> TransportAdapter {
        self.transport
    }

    fn start_adapter(&self) -> CaResult<()> {
        (self.start_adapter)()
    }

    fn stop_adapter(&self) -> CaResult<()> {
        (self.stop_adapter)()
    }

    fn start_listening(&self) -> CaResult<()> {
        (self.start_listening)()
    }

    fn stop_listening(&self) -> CaResult<()> {
        (self.stop_listening)()
    }

    fn start_discovery(&self) -> CaResult<()> {
        (self.start_discovery)()
    }

    fn send_unicast(&self, endpoint: &Endpoint, data: &[u8], kind: DataKind) -> CaResult<usize> {
        (self.send_unicast)(endpoint, data, kind)
    }

    fn send_multicast(&self, endpoint: &Endpoint, data: Vec<u8>, kind: DataKind) -> CaResult<usize> {
        (self.send_multicast)(endpoint, data, kind)
    }

    fn network_info(&self) -> CaResult<Vec<Endpoint>> {
        (self.network_info)()
    }

    fn read_data(&self) -> CaResult<()> {
        (self.read_data)()
    }

    fn terminate(&self) {
        (self.terminate)()
    }
}
