use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use log::{debug, info, trace, warn};

use ca_shared::{
    CaError, CaResult, DataKind, Endpoint, TransportAdapter, TransportFlags, WorkerQueue,
    COAP_PORT,
};

use crate::{
    adapter::{Adapter, AdapterContext, AdapterListener},
    collaborators::SecureSessionHandler,
    config::UdpConfig,
};

use super::sockets::{open_multicast, open_socket, ReceiveContext, SocketGroup, MULTICAST_V4, MULTICAST_V6};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Datagram {
    endpoint: Endpoint,
    data: Vec<u8>,
    multicast: bool,
}

struct UdpShared {
    config: UdpConfig,
    listener: Arc<dyn AdapterListener>,
    security: Option<Arc<dyn SecureSessionHandler>>,
    unicast: Mutex<Option<SocketGroup>>,
    multicast: Mutex<Option<SocketGroup>>,
}

/// CoAP over UDP adapter: unicast sockets per family, multicast group
/// sockets while listening, and a send worker.
pub struct UdpAdapter {
    shared: Arc<UdpShared>,
    send_queue: Mutex<Option<WorkerQueue<Datagram>>>,
    started: AtomicBool,
}

impl UdpAdapter {
    pub fn new(context: &AdapterContext) -> Self {
        Self {
            shared: Arc::new(UdpShared {
                config: context.config.udp.clone(),
                listener: context.listener.clone(),
                security: context.security.clone(),
                unicast: Mutex::new(None),
                multicast: Mutex::new(None),
            }),
            send_queue: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn factory() -> impl FnOnce(&AdapterContext) -> CaResult<Arc<dyn Adapter>> + Send {
        |context: &AdapterContext| Ok(Arc::new(UdpAdapter::new(context)) as Arc<dyn Adapter>)
    }

    /// Addresses of the unicast sockets
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        lock(&self.shared.unicast)
            .as_ref()
            .map(SocketGroup::local_addrs)
            .unwrap_or_default()
    }

    fn receive_context(&self, flags: TransportFlags) -> ReceiveContext {
        ReceiveContext {
            listener: self.shared.listener.clone(),
            security: self.shared.security.clone(),
            flags,
            max_datagram_size: self.shared.config.max_datagram_size,
        }
    }

    fn enabled_families(&self) -> Vec<IpAddr> {
        let mut families = Vec::new();
        if self.shared.config.ipv4_enabled {
            families.push(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }
        if self.shared.config.ipv6_enabled {
            families.push(IpAddr::V6(Ipv6Addr::UNSPECIFIED));
        }
        families
    }

    fn open_unicast(&self) -> CaResult<SocketGroup> {
        let mut group = SocketGroup::new();
        for ip in self.enabled_families() {
            let bind = SocketAddr::new(ip, self.shared.config.port);
            let socket = match open_socket(bind, &self.shared.config, false) {
                Ok(socket) => socket,
                Err(error) => {
                    warn!("Failed to open UDP socket on {}: {}", bind, error);
                    continue;
                }
            };
            let name = if ip.is_ipv4() { "ca-udp-recv-v4" } else { "ca-udp-recv-v6" };
            group
                .spawn(name, socket.into(), self.receive_context(TransportFlags::empty()))
                .map_err(|error| CaError::failed(error.to_string()))?;
        }
        if group.is_empty() {
            return Err(CaError::failed("no UDP socket could be opened"));
        }
        info!("UDP sockets bound on {:?}", group.local_addrs());
        Ok(group)
    }

    fn open_multicast_group(&self) -> CaResult<SocketGroup> {
        let mut group = SocketGroup::new();
        for ip in self.enabled_families() {
            let bind = SocketAddr::new(ip, COAP_PORT);
            let socket = match open_multicast(bind, &self.shared.config) {
                Ok(socket) => socket,
                Err(error) => {
                    warn!("Failed to join CoAP multicast group on {}: {}", bind, error);
                    continue;
                }
            };
            let name = if ip.is_ipv4() { "ca-udp-mcast-v4" } else { "ca-udp-mcast-v6" };
            group
                .spawn(name, socket, self.receive_context(TransportFlags::MULTICAST))
                .map_err(|error| CaError::failed(error.to_string()))?;
        }
        if group.is_empty() {
            return Err(CaError::failed("no CoAP multicast group could be joined"));
        }
        Ok(group)
    }

    fn enqueue(&self, datagram: Datagram) -> CaResult<usize> {
        let length = datagram.data.len();
        let send_queue = lock(&self.send_queue);
        let queue = send_queue.as_ref().ok_or(CaError::AdapterNotEnabled)?;
        queue.enqueue(datagram)?;
        Ok(length)
    }

    fn validate(&self, endpoint: &Endpoint, data: &[u8]) -> CaResult<()> {
        if data.is_empty() {
            return Err(CaError::InvalidParam {
                reason: "empty UDP payload",
            });
        }
        if endpoint.is_secure() && self.shared.security.is_none() {
            warn!("No secure session handler for {}", endpoint);
            return Err(CaError::NotSupported);
        }
        Ok(())
    }
}

impl UdpShared {
    /// Runs on the send worker
    fn transmit(&self, datagram: Datagram) {
        let Datagram {
            endpoint,
            data,
            multicast,
        } = datagram;
        let result = if multicast {
            self.send_to_groups(&endpoint, &data)
        } else {
            self.send_to_peer(&endpoint, &data)
        };
        match result {
            Ok(()) => trace!("Sent {} bytes to {}", data.len(), endpoint),
            Err(error) => {
                warn!("UDP send to {} failed: {}", endpoint, error);
                self.listener.send_failed(&endpoint, &data, error);
            }
        }
    }

    fn send_to_peer(&self, endpoint: &Endpoint, data: &[u8]) -> CaResult<()> {
        let target = endpoint.socket_addr()?;
        let socket = lock(&self.unicast)
            .as_ref()
            .and_then(|group| group.socket_for(target.is_ipv4()))
            .ok_or(CaError::AdapterNotEnabled)?;
        let bytes = match (&self.security, endpoint.is_secure()) {
            (Some(security), true) => security.encrypt(endpoint, data)?,
            _ => data.to_vec(),
        };
        socket
            .send_to(&bytes, target)
            .map_err(|error| CaError::send_failed(error.to_string()))?;
        Ok(())
    }

    /// Sends to the all-nodes group of every family the endpoint allows.
    fn send_to_groups(&self, endpoint: &Endpoint, data: &[u8]) -> CaResult<()> {
        let port = if endpoint.port == 0 { COAP_PORT } else { endpoint.port };
        let family = endpoint.flags.family();
        let mut targets = Vec::new();
        if self.config.ipv4_enabled && (family.is_empty() || family.contains(TransportFlags::IPV4)) {
            targets.push(SocketAddr::new(IpAddr::V4(MULTICAST_V4), port));
        }
        if self.config.ipv6_enabled && (family.is_empty() || family.contains(TransportFlags::IPV6)) {
            targets.push(SocketAddr::V6(SocketAddrV6::new(MULTICAST_V6, port, 0, endpoint.ifindex)));
        }

        let mut sent = false;
        let mut last_error = CaError::AdapterNotEnabled;
        for target in targets {
            let socket = lock(&self.unicast)
                .as_ref()
                .and_then(|group| group.socket_for(target.is_ipv4()));
            let Some(socket) = socket else {
                continue;
            };
            match socket.send_to(data, target) {
                Ok(_) => sent = true,
                Err(error) => {
                    debug!("Multicast to {} failed: {}", target, error);
                    last_error = CaError::send_failed(error.to_string());
                }
            }
        }
        if sent {
            Ok(())
        } else {
            Err(last_error)
        }
    }
}

impl Adapter for UdpAdapter {
    fn transport(&self) -> TransportAdapter {
        TransportAdapter::IP
    }

    fn start_adapter(&self) -> CaResult<()> {
        {
            let mut unicast = lock(&self.shared.unicast);
            if unicast.is_none() {
                *unicast = Some(self.open_unicast()?);
            }
        }
        {
            let mut send_queue = lock(&self.send_queue);
            if send_queue.is_none() {
                let shared = self.shared.clone();
                let queue = WorkerQueue::new("ca-udp-send", move |datagram: Datagram| {
                    shared.transmit(datagram)
                });
                queue.start()?;
                *send_queue = Some(queue);
            }
        }
        if !self.started.swap(true, Ordering::AcqRel) {
            self.shared
                .listener
                .adapter_state_changed(TransportAdapter::IP, true);
        }
        Ok(())
    }

    fn stop_adapter(&self) -> CaResult<()> {
        self.stop_listening()?;
        let queue = lock(&self.send_queue).take();
        if let Some(queue) = queue {
            queue.stop();
        }
        let unicast = lock(&self.shared.unicast).take();
        if let Some(group) = unicast {
            group.stop();
        }
        if self.started.swap(false, Ordering::AcqRel) {
            self.shared
                .listener
                .adapter_state_changed(TransportAdapter::IP, false);
        }
        Ok(())
    }

    /// Joins the CoAP multicast groups when configured to.
    fn start_listening(&self) -> CaResult<()> {
        if !self.shared.config.join_multicast {
            return Ok(());
        }
        let mut multicast = lock(&self.shared.multicast);
        if multicast.is_none() {
            *multicast = Some(self.open_multicast_group()?);
            info!("Joined CoAP multicast groups");
        }
        Ok(())
    }

    fn stop_listening(&self) -> CaResult<()> {
        let multicast = lock(&self.shared.multicast).take();
        if let Some(group) = multicast {
            group.stop();
        }
        Ok(())
    }

    /// Discovery answers arrive on the multicast group sockets.
    fn start_discovery(&self) -> CaResult<()> {
        self.start_listening()
    }

    fn send_unicast(&self, endpoint: &Endpoint, data: &[u8], _kind: DataKind) -> CaResult<usize> {
        self.validate(endpoint, data)?;
        self.enqueue(Datagram {
            endpoint: endpoint.clone(),
            data: data.to_vec(),
            multicast: false,
        })
    }

    fn send_multicast(&self, endpoint: &Endpoint, data: Vec<u8>, _kind: DataKind) -> CaResult<usize> {
        self.validate(endpoint, &data)?;
        self.enqueue(Datagram {
            endpoint: endpoint.clone(),
            data,
            multicast: true,
        })
    }

    fn network_info(&self) -> CaResult<Vec<Endpoint>> {
        if !self.started.load(Ordering::Acquire) {
            return Err(CaError::AdapterNotEnabled);
        }
        let address = local_ipaddress::get()
            .ok_or_else(|| CaError::failed("no local IPv4 interface found"))?;
        let port = self
            .local_addrs()
            .iter()
            .find(|local| local.is_ipv4())
            .map(|local| local.port())
            .unwrap_or(0);
        Ok(vec![Endpoint::new(
            TransportAdapter::IP,
            TransportFlags::IPV4,
            address,
            port,
        )])
    }

    /// Receive threads deliver on their own.
    fn read_data(&self) -> CaResult<()> {
        Ok(())
    }

    fn terminate(&self) {
        if let Err(error) = self.stop_adapter() {
            warn!("Failed to stop UDP adapter: {}", error);
        }
    }
}

impl Drop for UdpAdapter {
    fn drop(&mut self) {
        self.terminate();
    }
}
