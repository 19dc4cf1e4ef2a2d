use std::{
    io::{ErrorKind, Read, Write},
    mem,
    net::{SocketAddr, TcpStream},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
};

use log::{debug, info, trace, warn};

use ca_shared::{
    CaError, CaResult, Endpoint, SecureEndpoint, TransportAdapter, TransportFlags, WorkerQueue,
};

use crate::{
    adapter::AdapterListener, collaborators::SecureSessionHandler, config::TcpConfig,
};

use super::session::{
    ConnectionState, Frame, Session, SessionRole, SessionSnapshot, SocketHandle,
};

const READ_CHUNK: usize = 4096;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type SessionRef = Arc<Mutex<Session>>;

/// Bytes waiting for the send worker
struct Outgoing {
    endpoint: Endpoint,
    data: Vec<u8>,
}

struct SessionTable {
    sessions: Mutex<Vec<SessionRef>>,
    next_handle: AtomicU64,
    config: TcpConfig,
    listener: Arc<dyn AdapterListener>,
    security: Option<Arc<dyn SecureSessionHandler>>,
}

/// Owns every TCP session of the adapter.
///
/// The session list is locked before any single session, never the other
/// way around. Each connected session has one reader thread; all writes go
/// through the send worker, which connects on demand.
pub struct SessionManager {
    table: Arc<SessionTable>,
    send_queue: Mutex<Option<WorkerQueue<Outgoing>>>,
}

impl SessionManager {
    pub fn new(
        config: TcpConfig,
        listener: Arc<dyn AdapterListener>,
        security: Option<Arc<dyn SecureSessionHandler>>,
    ) -> Self {
        Self {
            table: Arc::new(SessionTable {
                sessions: Mutex::new(Vec::new()),
                next_handle: AtomicU64::new(1),
                config,
                listener,
                security,
            }),
            send_queue: Mutex::new(None),
        }
    }

    /// Starts the send worker. A stopped manager can be started again.
    pub fn start(&self) -> CaResult<()> {
        let mut send_queue = lock(&self.send_queue);
        if send_queue.is_some() {
            return Ok(());
        }
        let table = self.table.clone();
        let queue = WorkerQueue::new("ca-tcp-send", move |outgoing: Outgoing| {
            table.transmit(outgoing)
        });
        queue.start()?;
        *send_queue = Some(queue);
        Ok(())
    }

    /// Flushes pending sends, then closes every session.
    pub fn stop(&self) {
        let queue = lock(&self.send_queue).take();
        if let Some(queue) = queue {
            queue.stop();
        }
        self.disconnect_all();
    }

    /// Queues `data` for `endpoint`. Stream transports have no multicast, so
    /// that request is refused before any I/O happens.
    pub fn send(&self, endpoint: &Endpoint, data: &[u8], is_multicast: bool) -> CaResult<usize> {
        if is_multicast {
            debug!("Multicast is not supported over TCP");
            return Err(CaError::NotSupported);
        }
        if data.is_empty() {
            return Err(CaError::InvalidParam {
                reason: "empty TCP payload",
            });
        }
        if endpoint.is_secure() && self.table.security.is_none() {
            warn!("No secure session handler for {}", endpoint);
            return Err(CaError::NotSupported);
        }

        let send_queue = lock(&self.send_queue);
        let queue = send_queue.as_ref().ok_or(CaError::AdapterNotEnabled)?;
        queue.enqueue(Outgoing {
            endpoint: endpoint.clone(),
            data: data.to_vec(),
        })?;
        Ok(data.len())
    }

    /// Returns the live session for `endpoint`, opening one if needed.
    pub fn connect(&self, endpoint: &Endpoint) -> CaResult<SessionSnapshot> {
        let session = self.table.connect(endpoint)?;
        let snapshot = lock(&session).snapshot();
        Ok(snapshot)
    }

    /// Takes ownership of an accepted socket.
    pub fn accept(&self, stream: TcpStream, peer: SocketAddr) -> CaResult<SessionSnapshot> {
        let session = self.table.accept(stream, peer)?;
        let snapshot = lock(&session).snapshot();
        Ok(snapshot)
    }

    pub fn disconnect(&self, endpoint: &Endpoint) -> CaResult<()> {
        match self.table.find(endpoint) {
            Some(session) => {
                self.table.remove(&session);
                Ok(())
            }
            None => Err(CaError::failed(format!("no TCP session for {}", endpoint))),
        }
    }

    pub fn disconnect_all(&self) {
        let sessions = mem::take(&mut *lock(&self.table.sessions));
        for session in sessions {
            self.table.close(&session);
        }
    }

    pub fn find_by_endpoint(&self, endpoint: &Endpoint) -> Option<SessionSnapshot> {
        self.table
            .find(endpoint)
            .map(|session| lock(&session).snapshot())
    }

    pub fn find_by_socket(&self, handle: SocketHandle) -> Option<SessionSnapshot> {
        lock(&self.table.sessions).iter().find_map(|session| {
            let session = lock(session);
            (session.is_live() && session.handle() == handle).then(|| session.snapshot())
        })
    }

    /// Closes and forgets every session bound to `endpoint`.
    pub fn search_and_delete(&self, endpoint: &Endpoint) -> usize {
        self.table.search_and_delete(endpoint)
    }

    /// Live sessions
    pub fn len(&self) -> usize {
        lock(&self.table.sessions)
            .iter()
            .filter(|session| lock(session).is_live())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SessionTable {
    fn next_handle(&self) -> SocketHandle {
        SocketHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn new_session(&self, endpoint: Endpoint, role: SessionRole) -> SessionRef {
        Arc::new(Mutex::new(Session::new(
            endpoint,
            self.next_handle(),
            role,
            self.config.max_message_size,
            self.config.max_handshake_buffer,
        )))
    }

    fn find(&self, endpoint: &Endpoint) -> Option<SessionRef> {
        lock(&self.sessions)
            .iter()
            .find(|session| {
                let session = lock(session);
                session.is_live() && session.endpoint().same_peer(endpoint)
            })
            .cloned()
    }

    fn search_and_delete(&self, endpoint: &Endpoint) -> usize {
        let removed: Vec<SessionRef> = {
            let mut sessions = lock(&self.sessions);
            let (removed, kept) = mem::take(&mut *sessions)
                .into_iter()
                .partition(|session| lock(session).endpoint().same_peer(endpoint));
            *sessions = kept;
            removed
        };
        for session in &removed {
            self.close(session);
        }
        removed.len()
    }

    fn connect(self: &Arc<Self>, endpoint: &Endpoint) -> CaResult<SessionRef> {
        if let Some(existing) = self.find(endpoint) {
            return Ok(existing);
        }
        self.search_and_delete(endpoint);

        let address = endpoint.socket_addr()?;
        let session = self.new_session(endpoint.clone(), SessionRole::Client);
        lock(&self.sessions).push(session.clone());

        debug!("Connecting to {}", address);
        match TcpStream::connect_timeout(&address, self.config.connect_timeout) {
            Ok(stream) => {
                self.establish(&session, stream)?;
                info!("TCP session to {} connected", address);
                self.listener.connection_state_changed(endpoint, true);
                Ok(session)
            }
            Err(error) => {
                warn!("TCP connect to {} failed: {}", address, error);
                self.remove(&session);
                Err(CaError::send_failed(format!(
                    "connect to {} failed: {}",
                    address, error
                )))
            }
        }
    }

    fn accept(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) -> CaResult<SessionRef> {
        let endpoint = Endpoint::from_socket_addr(TransportAdapter::TCP, TransportFlags::empty(), peer);
        self.search_and_delete(&endpoint);

        let session = self.new_session(endpoint.clone(), SessionRole::Server);
        lock(&self.sessions).push(session.clone());
        self.establish(&session, stream)?;
        info!("TCP session from {} accepted", peer);
        self.listener.connection_state_changed(&endpoint, true);
        Ok(session)
    }

    /// Marks the session connected and spawns its reader.
    fn establish(self: &Arc<Self>, session: &SessionRef, stream: TcpStream) -> CaResult<()> {
        let reader = match stream.try_clone() {
            Ok(reader) => reader,
            Err(error) => {
                self.remove(session);
                return Err(CaError::failed(error.to_string()));
            }
        };
        let handle = {
            let mut guard = lock(session);
            if !guard.attach(stream) {
                return Err(CaError::failed("session closed while connecting"));
            }
            guard.handle()
        };

        let table = self.clone();
        let reader_session = session.clone();
        let spawned = thread::Builder::new()
            .name(format!("ca-tcp-read-{}", handle.0))
            .spawn(move || table.read_loop(reader_session, reader));
        if let Err(error) = spawned {
            self.remove(session);
            return Err(CaError::failed(format!(
                "failed to spawn reader for {}: {}",
                handle, error
            )));
        }
        Ok(())
    }

    fn read_loop(self: Arc<Self>, session: SessionRef, mut reader: TcpStream) {
        let mut buffer = vec![0u8; READ_CHUNK];
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => {
                    debug!("Peer closed {}", lock(&session).endpoint());
                    break;
                }
                Ok(read) => read,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => {
                    debug!("TCP read ended: {}", error);
                    break;
                }
            };
            trace!("Read {} bytes", read);

            let frames = {
                let mut guard = lock(&session);
                if !guard.is_live() {
                    return;
                }
                guard.feed(&buffer[..read], self.security.is_some())
            };
            match frames {
                Ok(frames) => {
                    for frame in frames {
                        self.deliver(&session, frame);
                    }
                }
                Err(error) => {
                    warn!("Closing TCP session after framing error: {}", error);
                    break;
                }
            }
        }
        self.remove(&session);
    }

    fn deliver(&self, session: &SessionRef, frame: Frame) {
        match frame {
            Frame::Coap(message) => {
                let endpoint = lock(session).endpoint().clone();
                self.listener
                    .packet_received(&SecureEndpoint::new(endpoint), &message);
            }
            Frame::TlsRecord(record) => self.deliver_record(session, &record),
        }
    }

    fn deliver_record(&self, session: &SessionRef, record: &[u8]) {
        let Some(security) = &self.security else {
            return;
        };
        let endpoint = lock(session).endpoint().clone();
        let decrypted = match security.decrypt(&endpoint, record) {
            Ok(decrypted) => decrypted,
            Err(error) => {
                warn!("Dropping TLS record from {}: {}", endpoint, error);
                return;
            }
        };

        for flight in &decrypted.outgoing {
            if let Err(error) = self.write(session, flight) {
                warn!("Failed to answer TLS peer {}: {}", endpoint, error);
                return;
            }
        }

        let Some(plaintext) = decrypted.plaintext else {
            return;
        };
        let messages = match lock(session).feed_plaintext(&plaintext) {
            Ok(messages) => messages,
            Err(error) => {
                warn!("Dropping decrypted data from {}: {}", endpoint, error);
                return;
            }
        };
        for message in messages {
            let secure_endpoint = match decrypted.identity.clone() {
                Some(identity) => SecureEndpoint::with_identity(endpoint.clone(), identity),
                None => SecureEndpoint::new(endpoint.clone()),
            };
            self.listener.packet_received(&secure_endpoint, &message);
        }
    }

    fn write(&self, session: &SessionRef, data: &[u8]) -> CaResult<()> {
        let mut writer = lock(session).writer()?;
        writer
            .write_all(data)
            .map_err(|error| CaError::send_failed(error.to_string()))
    }

    /// Runs on the send worker
    fn transmit(self: &Arc<Self>, outgoing: Outgoing) {
        let Outgoing { endpoint, data } = outgoing;
        let result = self.connect(&endpoint).and_then(|session| {
            let bytes = match (&self.security, endpoint.is_secure()) {
                (Some(security), true) => security.encrypt(&endpoint, &data)?,
                _ => data.clone(),
            };
            self.write(&session, &bytes).map_err(|error| {
                self.remove(&session);
                error
            })
        });
        match result {
            Ok(()) => trace!("Sent {} bytes to {}", data.len(), endpoint),
            Err(error) => {
                warn!("TCP send to {} failed: {}", endpoint, error);
                self.listener.send_failed(&endpoint, &data, error);
            }
        }
    }

    /// Closes the session and drops it from the table.
    fn remove(&self, session: &SessionRef) {
        lock(&self.sessions).retain(|other| !Arc::ptr_eq(other, session));
        self.close(session);
    }

    /// Reports a connected session as gone exactly once.
    fn close(&self, session: &SessionRef) {
        let (was_connected, endpoint) = {
            let mut guard = lock(session);
            let was_connected = guard.state() == ConnectionState::Connected;
            if !guard.close() {
                return;
            }
            (was_connected, guard.endpoint().clone())
        };
        if !was_connected {
            return;
        }
        info!("TCP session with {} closed", endpoint);
        if endpoint.is_secure() {
            if let Some(security) = &self.security {
                security.close(&endpoint);
            }
        }
        self.listener.connection_state_changed(&endpoint, false);
    }
}
