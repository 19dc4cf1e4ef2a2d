use std::{
    fmt,
    net::{Shutdown, TcpStream},
};

use log::trace;

use ca_shared::{CaError, CaResult, Endpoint, StreamFramer, TlsRecordBuffer, TransportFlags};

use crate::transport::is_tls_record;

/// Identifies one accepted or connected socket for the lifetime of the process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketHandle(pub(crate) u64);

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Terminal
    Disconnected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionRole {
    Client,
    Server,
}

/// What the first bytes on the wire turned out to be
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolKind {
    Unknown,
    SecureHandshake,
    Coap,
}

/// A complete unit read off a session
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Coap(Vec<u8>),
    TlsRecord(Vec<u8>),
}

/// Read-only copy of a session's bookkeeping
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub endpoint: Endpoint,
    pub handle: SocketHandle,
    pub state: ConnectionState,
    pub role: SessionRole,
    pub protocol: ProtocolKind,
}

/// One TCP connection
pub struct Session {
    endpoint: Endpoint,
    handle: SocketHandle,
    role: SessionRole,
    state: ConnectionState,
    protocol: ProtocolKind,
    stream: Option<TcpStream>,
    framer: StreamFramer,
    tls_records: TlsRecordBuffer,
}

impl Session {
    pub fn new(
        endpoint: Endpoint,
        handle: SocketHandle,
        role: SessionRole,
        max_message_size: usize,
        max_handshake_buffer: usize,
    ) -> Self {
        // A client knows up front whether it speaks TLS
        let protocol = match (role, endpoint.is_secure()) {
            (SessionRole::Client, true) => ProtocolKind::SecureHandshake,
            (SessionRole::Client, false) => ProtocolKind::Coap,
            (SessionRole::Server, _) => ProtocolKind::Unknown,
        };
        Self {
            endpoint,
            handle,
            role,
            state: ConnectionState::Connecting,
            protocol,
            stream: None,
            framer: StreamFramer::new(max_message_size),
            tls_records: TlsRecordBuffer::new(max_handshake_buffer),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    pub fn is_live(&self) -> bool {
        self.state != ConnectionState::Disconnected
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            endpoint: self.endpoint.clone(),
            handle: self.handle,
            state: self.state,
            role: self.role,
            protocol: self.protocol,
        }
    }

    /// Moves to `next` if the transition is allowed. Re-entering the current
    /// state is a no-op; leaving `Disconnected` is refused.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        let allowed = matches!(
            (self.state, next),
            (Connecting, Connected) | (Connecting, Disconnected) | (Connected, Disconnected)
        );
        if self.state == next {
            return true;
        }
        if allowed {
            trace!("{} {:?} -> {:?}", self.handle, self.state, next);
            self.state = next;
        }
        allowed
    }

    /// Attaches the connected socket and marks the session `Connected`
    pub(crate) fn attach(&mut self, stream: TcpStream) -> bool {
        if !self.transition(ConnectionState::Connected) {
            return false;
        }
        self.stream = Some(stream);
        true
    }

    /// Marks the session `Disconnected` and shuts the socket down, which
    /// also ends its reader. Returns false if it was already disconnected.
    pub(crate) fn close(&mut self) -> bool {
        if self.state == ConnectionState::Disconnected {
            return false;
        }
        self.transition(ConnectionState::Disconnected);
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.framer.reset();
        self.tls_records.reset();
        true
    }

    /// A second handle on the socket so writes happen outside the session lock
    pub(crate) fn writer(&self) -> CaResult<TcpStream> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| CaError::send_failed(format!("{} is not connected", self.handle)))?;
        stream
            .try_clone()
            .map_err(|error| CaError::send_failed(error.to_string()))
    }

    /// Splits received bytes into complete frames. A server session decides
    /// between TLS and plain CoAP on its first byte.
    pub(crate) fn feed(&mut self, data: &[u8], secure_available: bool) -> CaResult<Vec<Frame>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if self.protocol == ProtocolKind::Unknown {
            if secure_available && is_tls_record(data) {
                self.protocol = ProtocolKind::SecureHandshake;
                self.endpoint.flags |= TransportFlags::SECURE;
            } else {
                self.protocol = ProtocolKind::Coap;
            }
            trace!("{} detected {:?}", self.handle, self.protocol);
        }

        match self.protocol {
            ProtocolKind::SecureHandshake => Ok(self
                .tls_records
                .feed(data)?
                .into_iter()
                .map(Frame::TlsRecord)
                .collect()),
            _ => Ok(self.framer.feed(data)?.into_iter().map(Frame::Coap).collect()),
        }
    }

    /// Feeds decrypted application data through the CoAP framer
    pub(crate) fn feed_plaintext(&mut self, plaintext: &[u8]) -> CaResult<Vec<Vec<u8>>> {
        Ok(self.framer.feed(plaintext)?)
    }
}
