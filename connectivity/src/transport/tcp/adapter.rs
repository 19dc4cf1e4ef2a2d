use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, info, warn};

use ca_shared::{CaError, CaResult, DataKind, Endpoint, TransportAdapter, TransportFlags};

use crate::{
    adapter::{Adapter, AdapterContext, AdapterListener},
    config::TcpConfig,
};

use super::session_manager::SessionManager;

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct BoundSocket {
    local: SocketAddr,
    accept_thread: JoinHandle<()>,
}

struct ListeningServer {
    running: Arc<AtomicBool>,
    sockets: Vec<BoundSocket>,
}

/// CoAP over TCP adapter
pub struct TcpAdapter {
    config: TcpConfig,
    listener: Arc<dyn AdapterListener>,
    sessions: Arc<SessionManager>,
    server: Mutex<Option<ListeningServer>>,
    started: AtomicBool,
}

impl TcpAdapter {
    pub fn new(context: &AdapterContext) -> Self {
        let config = context.config.tcp.clone();
        Self {
            sessions: Arc::new(SessionManager::new(
                config.clone(),
                context.listener.clone(),
                context.security.clone(),
            )),
            config,
            listener: context.listener.clone(),
            server: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn factory() -> impl FnOnce(&AdapterContext) -> CaResult<Arc<dyn Adapter>> + Send {
        |context: &AdapterContext| Ok(Arc::new(TcpAdapter::new(context)) as Arc<dyn Adapter>)
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Addresses the listening server is bound to
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        lock(&self.server)
            .as_ref()
            .map(|server| server.sockets.iter().map(|socket| socket.local).collect())
            .unwrap_or_default()
    }

    fn bind_addresses(&self) -> Vec<SocketAddr> {
        let mut addresses = Vec::new();
        if self.config.ipv4_enabled {
            addresses.push(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                self.config.ipv4_port,
            ));
        }
        if self.config.ipv6_enabled {
            addresses.push(SocketAddr::new(
                IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                self.config.ipv6_port,
            ));
        }
        addresses
    }

    fn shutdown_server(&self) {
        let Some(server) = lock(&self.server).take() else {
            return;
        };
        server.running.store(false, Ordering::Release);
        for socket in server.sockets {
            // A blocked accept() only returns once something connects
            let wake = match socket.local.ip() {
                IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), socket.local.port()),
                IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), socket.local.port()),
            };
            if let Err(error) = TcpStream::connect_timeout(&wake, WAKE_TIMEOUT) {
                debug!("Wake-up connect to {} failed: {}", wake, error);
            }
            if socket.accept_thread.join().is_err() {
                warn!("TCP accept thread for {} panicked", socket.local);
            }
            info!("TCP server on {} stopped", socket.local);
        }
    }
}

fn accept_loop(listener: TcpListener, running: Arc<AtomicBool>, sessions: Arc<SessionManager>) {
    loop {
        let accepted = listener.accept();
        if !running.load(Ordering::Acquire) {
            break;
        }
        match accepted {
            Ok((stream, peer)) => {
                if let Err(error) = sessions.accept(stream, peer) {
                    warn!("Failed to accept TCP session from {}: {}", peer, error);
                }
            }
            Err(error) => warn!("TCP accept failed: {}", error),
        }
    }
}

impl Adapter for TcpAdapter {
    fn transport(&self) -> TransportAdapter {
        TransportAdapter::TCP
    }

    fn start_adapter(&self) -> CaResult<()> {
        self.sessions.start()?;
        if !self.started.swap(true, Ordering::AcqRel) {
            self.listener
                .adapter_state_changed(TransportAdapter::TCP, true);
        }
        Ok(())
    }

    fn stop_adapter(&self) -> CaResult<()> {
        self.shutdown_server();
        self.sessions.stop();
        if self.started.swap(false, Ordering::AcqRel) {
            self.listener
                .adapter_state_changed(TransportAdapter::TCP, false);
        }
        Ok(())
    }

    /// Binds one listener per enabled family and starts accepting.
    fn start_listening(&self) -> CaResult<()> {
        let mut server = lock(&self.server);
        if server.is_some() {
            return Ok(());
        }

        let running = Arc::new(AtomicBool::new(true));
        let mut sockets = Vec::new();
        for address in self.bind_addresses() {
            let listener = match TcpListener::bind(address) {
                Ok(listener) => listener,
                Err(error) => {
                    warn!("Failed to bind TCP server on {}: {}", address, error);
                    continue;
                }
            };
            let local = listener.local_addr().unwrap_or(address);
            let thread_running = running.clone();
            let sessions = self.sessions.clone();
            let accept_thread = thread::Builder::new()
                .name(format!("ca-tcp-accept-{}", local.port()))
                .spawn(move || accept_loop(listener, thread_running, sessions))
                .map_err(|error| CaError::failed(error.to_string()))?;
            info!("TCP server listening on {}", local);
            sockets.push(BoundSocket {
                local,
                accept_thread,
            });
        }

        if sockets.is_empty() {
            return Err(CaError::failed("no TCP listening socket could be bound"));
        }
        *server = Some(ListeningServer { running, sockets });
        Ok(())
    }

    fn stop_listening(&self) -> CaResult<()> {
        self.shutdown_server();
        Ok(())
    }

    /// Discovery over TCP needs nothing beyond the listening server.
    fn start_discovery(&self) -> CaResult<()> {
        Ok(())
    }

    fn send_unicast(&self, endpoint: &Endpoint, data: &[u8], _kind: DataKind) -> CaResult<usize> {
        self.sessions.send(endpoint, data, false)
    }

    fn send_multicast(&self, endpoint: &Endpoint, data: Vec<u8>, _kind: DataKind) -> CaResult<usize> {
        self.sessions.send(endpoint, &data, true)
    }

    fn network_info(&self) -> CaResult<Vec<Endpoint>> {
        if !self.started.load(Ordering::Acquire) {
            return Err(CaError::AdapterNotEnabled);
        }
        let address = local_ipaddress::get()
            .ok_or_else(|| CaError::failed("no local IPv4 interface found"))?;
        let ports: Vec<u16> = self
            .local_addrs()
            .iter()
            .filter(|local| local.is_ipv4())
            .map(|local| local.port())
            .collect();
        let ports = if ports.is_empty() { vec![0] } else { ports };
        Ok(ports
            .into_iter()
            .map(|port| {
                Endpoint::new(TransportAdapter::TCP, TransportFlags::IPV4, address.clone(), port)
            })
            .collect())
    }

    /// Reader threads deliver on their own.
    fn read_data(&self) -> CaResult<()> {
        Ok(())
    }

    fn terminate(&self) {
        self.shutdown_server();
        self.sessions.stop();
        self.started.store(false, Ordering::Release);
    }

    fn disconnect(&self, endpoint: &Endpoint) -> CaResult<()> {
        self.sessions.disconnect(endpoint)
    }
}

impl Drop for TcpAdapter {
    fn drop(&mut self) {
        self.shutdown_server();
    }
}
