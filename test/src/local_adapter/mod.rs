//! In-memory adapter for end-to-end testing.
//! Records every outbound packet and lets a test inject inbound bytes as if
//! they had arrived from the wire, without any network I/O.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ca_connectivity::{Adapter, AdapterContext, AdapterListener};
use ca_shared::{
    CaError, CaResult, DataKind, Endpoint, SecureEndpoint, TransportAdapter, TransportFlags,
};

/// One packet handed to the adapter by the registry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentPacket {
    pub endpoint: Endpoint,
    pub data: Vec<u8>,
    pub kind: DataKind,
    pub multicast: bool,
}

/// Test-side view of a [`LocalAdapter`]
pub struct LocalAdapterHandle {
    transport: TransportAdapter,
    listener: Mutex<Option<Arc<dyn AdapterListener>>>,
    sent: Mutex<Vec<SentPacket>>,
    calls: Mutex<Vec<&'static str>>,
    inbound: Mutex<VecDeque<(SecureEndpoint, Vec<u8>)>>,
    fail_sends: AtomicBool,
    network_info: Mutex<CaResult<Vec<Endpoint>>>,
}

impl LocalAdapterHandle {
    fn new(transport: TransportAdapter) -> Self {
        Self {
            transport,
            listener: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            inbound: Mutex::new(VecDeque::new()),
            fail_sends: AtomicBool::new(false),
            network_info: Mutex::new(Ok(vec![Endpoint::new(
                transport,
                TransportFlags::IPV4,
                "10.0.0.1",
                5683,
            )])),
        }
    }

    pub fn transport(&self) -> TransportAdapter {
        self.transport
    }

    pub fn sent(&self) -> Vec<SentPacket> {
        self.sent.lock().unwrap().clone()
    }

    /// Names of the lifecycle capabilities invoked so far, in order
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn set_network_info(&self, result: CaResult<Vec<Endpoint>>) {
        *self.network_info.lock().unwrap() = result;
    }

    /// Delivers `data` to the connectivity core right away, on this thread.
    pub fn inject(&self, endpoint: &Endpoint, data: &[u8]) {
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener.packet_received(&SecureEndpoint::new(endpoint.clone()), data);
        }
    }

    /// Holds `data` until the next synchronous read.
    pub fn queue_inbound(&self, endpoint: &Endpoint, data: &[u8]) {
        self.inbound
            .lock()
            .unwrap()
            .push_back((SecureEndpoint::new(endpoint.clone()), data.to_vec()));
    }

    /// Reports an adapter-side send failure, as a transport worker would.
    pub fn fail_later(&self, endpoint: &Endpoint, data: &[u8], error: CaError) {
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener.send_failed(endpoint, data, error);
        }
    }

    /// Reports a connection change, as a connection-oriented transport would.
    pub fn connection_changed(&self, endpoint: &Endpoint, connected: bool) {
        if let Some(listener) = self.listener() {
            listener.connection_state_changed(endpoint, connected);
        }
    }

    fn listener(&self) -> Option<Arc<dyn AdapterListener>> {
        self.listener.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Adapter backed by a [`LocalAdapterHandle`]
pub struct LocalAdapter {
    handle: Arc<LocalAdapterHandle>,
}

impl LocalAdapter {
    /// Returns a factory for `ContextBuilder::adapter` and the handle tests drive.
    pub fn pair(
        transport: TransportAdapter,
    ) -> (
        impl FnOnce(&AdapterContext) -> CaResult<Arc<dyn Adapter>> + Send,
        Arc<LocalAdapterHandle>,
    ) {
        let handle = Arc::new(LocalAdapterHandle::new(transport));
        let factory_handle = handle.clone();
        let factory = move |context: &AdapterContext| {
            *factory_handle.listener.lock().unwrap() = Some(context.listener.clone());
            Ok(Arc::new(LocalAdapter {
                handle: factory_handle,
            }) as Arc<dyn Adapter>)
        };
        (factory, handle)
    }

    fn send(&self, endpoint: &Endpoint, data: Vec<u8>, kind: DataKind, multicast: bool) -> CaResult<usize> {
        if self.handle.fail_sends.load(Ordering::SeqCst) {
            return Err(CaError::send_failed("local adapter set to fail"));
        }
        let length = data.len();
        self.handle.sent.lock().unwrap().push(SentPacket {
            endpoint: endpoint.clone(),
            data,
            kind,
            multicast,
        });
        Ok(length)
    }
}

impl Adapter for LocalAdapter {
    fn transport(&self) -> TransportAdapter {
        self.handle.transport
    }

    fn start_adapter(&self) -> CaResult<()> {
        self.handle.record("start_adapter");
        if let Some(listener) = self.handle.listener() {
            listener.adapter_state_changed(self.handle.transport, true);
        }
        Ok(())
    }

    fn stop_adapter(&self) -> CaResult<()> {
        self.handle.record("stop_adapter");
        if let Some(listener) = self.handle.listener() {
            listener.adapter_state_changed(self.handle.transport, false);
        }
        Ok(())
    }

    fn start_listening(&self) -> CaResult<()> {
        self.handle.record("start_listening");
        Ok(())
    }

    fn stop_listening(&self) -> CaResult<()> {
        self.handle.record("stop_listening");
        Ok(())
    }

    fn start_discovery(&self) -> CaResult<()> {
        self.handle.record("start_discovery");
        Ok(())
    }

    fn send_unicast(&self, endpoint: &Endpoint, data: &[u8], kind: DataKind) -> CaResult<usize> {
        self.send(endpoint, data.to_vec(), kind, false)
    }

    fn send_multicast(&self, endpoint: &Endpoint, data: Vec<u8>, kind: DataKind) -> CaResult<usize> {
        self.send(endpoint, data, kind, true)
    }

    fn network_info(&self) -> CaResult<Vec<Endpoint>> {
        self.handle.network_info.lock().unwrap().clone()
    }

    fn read_data(&self) -> CaResult<()> {
        self.handle.record("read_data");
        let listener = self.handle.listener.lock().unwrap().clone();
        let Some(listener) = listener else {
            return Err(CaError::NotInitialized);
        };
        let inbound: Vec<_> = self.handle.inbound.lock().unwrap().drain(..).collect();
        for (endpoint, data) in inbound {
            listener.packet_received(&endpoint, &data);
        }
        Ok(())
    }

    fn terminate(&self) {
        self.handle.record("terminate");
        *self.handle.listener.lock().unwrap() = None;
    }

    fn disconnect(&self, endpoint: &Endpoint) -> CaResult<()> {
        self.handle.record("disconnect");
        if endpoint.adapter == self.handle.transport {
            Ok(())
        } else {
            Err(CaError::NotSupported)
        }
    }
}
