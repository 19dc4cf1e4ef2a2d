use std::{default::Default, time::Duration};

use ca_shared::{TransportAdapter, TLS_HEADER_SIZE};

/// How received messages reach the application callbacks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// A receive worker thread invokes the callbacks
    #[default]
    Threaded,
    /// Messages wait until the application calls `handle_request_response()`
    Polled,
}

/// What a multi-adapter send does when one adapter fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SendPolicy {
    /// Log the failure and keep going; succeed if any adapter succeeded
    #[default]
    BestEffort,
    /// Stop at the first failing adapter and report it
    AbortOnFirstFailure,
}

/// Contains Config properties which will be used by the connectivity core
#[derive(Clone, Debug)]
pub struct ConnectivityConfig {
    /// Built-in transports constructed at `initialize()`. Transports whose
    /// cargo feature is disabled are skipped.
    pub transports: TransportAdapter,
    /// How received messages are delivered to the application
    pub dispatch: DispatchMode,
    /// Failure handling when a send fans out to several adapters
    pub send_policy: SendPolicy,
    /// Drop requests that arrive once per IP family on the IP transport
    pub dual_stack: bool,
    /// Payloads above this size are offered to the blockwise collaborator
    pub block_size: usize,
    /// Used to configure the TCP transport
    pub tcp: TcpConfig,
    /// Used to configure the UDP transport
    pub udp: UdpConfig,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            transports: TransportAdapter::IP | TransportAdapter::TCP,
            dispatch: DispatchMode::default(),
            send_policy: SendPolicy::default(),
            dual_stack: true,
            block_size: 1024,
            tcp: TcpConfig::default(),
            udp: UdpConfig::default(),
        }
    }
}

/// Settings of the CoAP over TCP transport
#[derive(Clone, Debug)]
pub struct TcpConfig {
    pub ipv4_enabled: bool,
    pub ipv6_enabled: bool,
    /// Listening port for IPv4, 0 picks an ephemeral port
    pub ipv4_port: u16,
    /// Listening port for IPv6, 0 picks an ephemeral port
    pub ipv6_port: u16,
    /// How long an outbound connect may take before the session is dropped
    pub connect_timeout: Duration,
    /// Largest framed CoAP message accepted from a peer
    pub max_message_size: usize,
    /// Upper bound of the per-session TLS record scratch buffer
    pub max_handshake_buffer: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            ipv4_enabled: true,
            ipv6_enabled: true,
            ipv4_port: 0,
            ipv6_port: 0,
            connect_timeout: Duration::from_secs(5),
            max_message_size: 128 * 1024,
            max_handshake_buffer: 16 * 1024 + 2048 + TLS_HEADER_SIZE,
        }
    }
}

/// Settings of the CoAP over UDP transport
#[derive(Clone, Debug)]
pub struct UdpConfig {
    pub ipv4_enabled: bool,
    pub ipv6_enabled: bool,
    /// Unicast port, 0 picks an ephemeral port
    pub port: u16,
    /// Join the CoAP multicast groups on 5683
    pub join_multicast: bool,
    /// Receive threads wake at this interval to notice a stop request
    pub read_timeout: Duration,
    pub multicast_ttl: u32,
    /// Largest datagram accepted from a socket. Larger ones are dropped
    /// rather than delivered cut short.
    pub max_datagram_size: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            ipv4_enabled: true,
            ipv6_enabled: true,
            port: 0,
            join_multicast: true,
            read_timeout: Duration::from_millis(200),
            multicast_ttl: 1,
            max_datagram_size: 65_535,
        }
    }
}
