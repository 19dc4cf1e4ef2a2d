use std::{
    fmt,
    net::{IpAddr, SocketAddr},
};

use crate::{
    error::{CaError, CaResult},
    types::{TransportAdapter, TransportFlags},
};

/// Default CoAP port for plain traffic
pub const COAP_PORT: u16 = 5683;
/// Default CoAP port for secured traffic
pub const COAP_SECURE_PORT: u16 = 5684;

/// An addressable remote peer on a specific transport.
///
/// Endpoints are plain values: they are cloned whenever they cross an
/// ownership boundary (queued for a worker, stored in a session record).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub adapter: TransportAdapter,
    pub flags: TransportFlags,
    pub addr: String,
    pub port: u16,
    pub ifindex: u32,
    pub route_uri: Option<String>,
    pub remote_id: Option<String>,
}

impl Endpoint {
    pub fn new(
        adapter: TransportAdapter,
        flags: TransportFlags,
        addr: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            adapter,
            flags,
            addr: addr.into(),
            port,
            ifindex: 0,
            route_uri: None,
            remote_id: None,
        }
    }

    /// Builds an endpoint from a socket address, tagging the matching family flag.
    pub fn from_socket_addr(
        adapter: TransportAdapter,
        flags: TransportFlags,
        socket_addr: SocketAddr,
    ) -> Self {
        let family = match socket_addr.ip() {
            IpAddr::V4(_) => TransportFlags::IPV4,
            IpAddr::V6(_) => TransportFlags::IPV6,
        };
        let ifindex = match socket_addr {
            SocketAddr::V6(v6) => v6.scope_id(),
            SocketAddr::V4(_) => 0,
        };
        let mut endpoint = Self::new(
            adapter,
            flags | family,
            socket_addr.ip().to_string(),
            socket_addr.port(),
        );
        endpoint.ifindex = ifindex;
        endpoint
    }

    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    pub fn with_route_uri(mut self, route_uri: impl Into<String>) -> Self {
        self.route_uri = Some(route_uri.into());
        self
    }

    pub fn is_secure(&self) -> bool {
        self.flags.contains(TransportFlags::SECURE)
    }

    pub fn is_multicast(&self) -> bool {
        self.flags.contains(TransportFlags::MULTICAST)
    }

    pub fn is_ipv6(&self) -> bool {
        self.flags.contains(TransportFlags::IPV6)
            || (!self.flags.contains(TransportFlags::IPV4) && self.addr.contains(':'))
    }

    /// Same remote address and port, reached over an overlapping set of flags.
    pub fn same_peer(&self, other: &Endpoint) -> bool {
        self.addr == other.addr
            && self.port == other.port
            && (self.flags.family().is_empty()
                || other.flags.family().is_empty()
                || self.flags.intersects(other.flags.family()))
    }

    /// Resolves the textual address into a socket address, substituting the
    /// default CoAP port when none is set.
    pub fn socket_addr(&self) -> CaResult<SocketAddr> {
        let host = match self.addr.split_once('%') {
            Some((host, _zone)) => host,
            None => self.addr.as_str(),
        };
        let ip: IpAddr = host.parse().map_err(|_| CaError::InvalidParam {
            reason: "endpoint address is not a numeric IP address",
        })?;
        let port = match self.port {
            0 if self.is_secure() => COAP_SECURE_PORT,
            0 => COAP_PORT,
            port => port,
        };
        Ok(match ip {
            IpAddr::V6(v6) => SocketAddr::V6(std::net::SocketAddrV6::new(v6, port, 0, self.ifindex)),
            IpAddr::V4(v4) => SocketAddr::V4(std::net::SocketAddrV4::new(v4, port)),
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.addr.contains(':') {
            write!(f, "[{}]:{} ({:?})", self.addr, self.port, self.adapter)
        } else {
            write!(f, "{}:{} ({:?})", self.addr, self.port, self.adapter)
        }
    }
}

/// Identity of a peer authenticated by a secure session
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RemoteIdentity(pub Vec<u8>);

/// Read-only view of a remote peer handed to receive callbacks
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecureEndpoint {
    pub endpoint: Endpoint,
    pub identity: Option<RemoteIdentity>,
}

impl SecureEndpoint {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            identity: None,
        }
    }

    pub fn with_identity(endpoint: Endpoint, identity: RemoteIdentity) -> Self {
        Self {
            endpoint,
            identity: Some(identity),
        }
    }
}

impl From<Endpoint> for SecureEndpoint {
    fn from(endpoint: Endpoint) -> Self {
        SecureEndpoint::new(endpoint)
    }
}
