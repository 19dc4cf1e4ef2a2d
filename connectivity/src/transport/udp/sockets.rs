use std::{
    io::{self, ErrorKind},
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use log::{debug, trace, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use ca_shared::{Endpoint, SecureEndpoint, TransportAdapter, TransportFlags};

use crate::{
    adapter::AdapterListener, collaborators::SecureSessionHandler, config::UdpConfig,
    transport::is_tls_record,
};

/// All CoAP nodes, IPv4
pub const MULTICAST_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 187);
/// All CoAP nodes, link-local IPv6
pub const MULTICAST_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x158);

/// Opens a datagram socket with the adapter's timeouts and TTL. Sockets that
/// share the CoAP port set `reuse`.
pub(crate) fn open_socket(bind: SocketAddr, config: &UdpConfig, reuse: bool) -> io::Result<Socket> {
    let domain = if bind.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if reuse {
        socket.set_reuse_address(true)?;
    }
    if bind.is_ipv6() {
        socket.set_only_v6(true)?;
        socket.set_multicast_hops_v6(config.multicast_ttl)?;
    } else {
        socket.set_multicast_ttl_v4(config.multicast_ttl)?;
    }
    socket.set_read_timeout(Some(config.read_timeout))?;
    socket.bind(&SockAddr::from(bind))?;
    Ok(socket)
}

/// Opens a socket on the CoAP port joined to the all-nodes group of its family.
pub(crate) fn open_multicast(bind: SocketAddr, config: &UdpConfig) -> io::Result<UdpSocket> {
    let socket = open_socket(bind, config, true)?;
    match bind {
        SocketAddr::V4(_) => socket.join_multicast_v4(&MULTICAST_V4, &Ipv4Addr::UNSPECIFIED)?,
        SocketAddr::V6(_) => socket.join_multicast_v6(&MULTICAST_V6, 0)?,
    }
    Ok(socket.into())
}

/// Everything a receive thread needs to hand datagrams upward
#[derive(Clone)]
pub(crate) struct ReceiveContext {
    pub listener: Arc<dyn AdapterListener>,
    pub security: Option<Arc<dyn SecureSessionHandler>>,
    /// Extra flags stamped on every sender, `MULTICAST` for group sockets
    pub flags: TransportFlags,
    pub max_datagram_size: usize,
}

impl ReceiveContext {
    fn deliver(&self, socket: &UdpSocket, peer: SocketAddr, data: &[u8]) {
        let mut endpoint = Endpoint::from_socket_addr(TransportAdapter::IP, self.flags, peer);

        let security = match &self.security {
            Some(security) if is_tls_record(data) => security,
            _ => {
                self.listener
                    .packet_received(&SecureEndpoint::new(endpoint), data);
                return;
            }
        };

        endpoint.flags |= TransportFlags::SECURE;
        let decrypted = match security.decrypt(&endpoint, data) {
            Ok(decrypted) => decrypted,
            Err(error) => {
                warn!("Dropping DTLS record from {}: {}", endpoint, error);
                return;
            }
        };
        for flight in &decrypted.outgoing {
            if let Err(error) = socket.send_to(flight, peer) {
                warn!("Failed to answer DTLS peer {}: {}", peer, error);
            }
        }
        if let Some(plaintext) = decrypted.plaintext {
            let secure_endpoint = match decrypted.identity {
                Some(identity) => SecureEndpoint::with_identity(endpoint, identity),
                None => SecureEndpoint::new(endpoint),
            };
            self.listener.packet_received(&secure_endpoint, &plaintext);
        }
    }
}

fn receive_loop(socket: Arc<UdpSocket>, running: Arc<AtomicBool>, context: ReceiveContext) {
    // one spare byte shows a datagram the limit would have cut off
    let mut buffer = vec![0u8; context.max_datagram_size + 1];
    while running.load(Ordering::Acquire) {
        let (length, peer) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(error)
                if matches!(
                    error.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(error) => {
                warn!("UDP receive failed, closing receiver: {}", error);
                break;
            }
        };
        if length == 0 {
            continue;
        }
        if length > context.max_datagram_size {
            warn!(
                "Dropping datagram from {} larger than {} bytes",
                peer, context.max_datagram_size
            );
            continue;
        }
        trace!("Received {} bytes from {}", length, peer);
        context.deliver(&socket, peer, &buffer[..length]);
    }
}

/// A set of sockets sharing one stop flag, each with its own receive thread
pub(crate) struct SocketGroup {
    sockets: Vec<Arc<UdpSocket>>,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl SocketGroup {
    pub fn new() -> Self {
        Self {
            sockets: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            threads: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// Adds `socket` and spawns its receiver
    pub fn spawn(&mut self, name: &str, socket: UdpSocket, context: ReceiveContext) -> io::Result<()> {
        let socket = Arc::new(socket);
        let running = self.running.clone();
        let thread_socket = socket.clone();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || receive_loop(thread_socket, running, context))?;
        self.sockets.push(socket);
        self.threads.push(thread);
        Ok(())
    }

    /// The socket bound to the given family
    pub fn socket_for(&self, ipv4: bool) -> Option<Arc<UdpSocket>> {
        self.sockets
            .iter()
            .find(|socket| {
                socket
                    .local_addr()
                    .map(|local| local.is_ipv4() == ipv4)
                    .unwrap_or(false)
            })
            .cloned()
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.sockets
            .iter()
            .filter_map(|socket| socket.local_addr().ok())
            .collect()
    }

    /// Receivers notice the flag within one read timeout.
    pub fn stop(self) {
        self.running.store(false, Ordering::Release);
        for thread in self.threads {
            if thread.join().is_err() {
                warn!("UDP receive thread panicked");
            }
        }
        debug!("Closed {} UDP sockets", self.sockets.len());
    }
}
