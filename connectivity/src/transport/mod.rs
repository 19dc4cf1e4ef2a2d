cfg_if! {
    if #[cfg(feature = "transport_tcp")] {
        pub mod tcp;
    } else {}
}
cfg_if! {
    if #[cfg(feature = "transport_udp")] {
        pub mod udp;
    } else {}
}

use ca_shared::TransportAdapter;

use crate::adapter::AdapterFactory;

/// Factories for the compiled-in transports named in `transports`
pub(crate) fn builtin_factories(transports: TransportAdapter) -> Vec<Box<dyn AdapterFactory>> {
    let mut factories: Vec<Box<dyn AdapterFactory>> = Vec::new();
    cfg_if! {
        if #[cfg(feature = "transport_udp")] {
            if transports.contains(TransportAdapter::IP) {
                factories.push(Box::new(udp::UdpAdapter::factory()));
            }
        } else {}
    }
    cfg_if! {
        if #[cfg(feature = "transport_tcp")] {
            if transports.contains(TransportAdapter::TCP) {
                factories.push(Box::new(tcp::TcpAdapter::factory()));
            }
        } else {}
    }
    if factories.is_empty() && !transports.is_empty() {
        log::debug!("No built-in transport compiled in for {:?}", transports);
    }
    factories
}

/// First byte is a TLS/DTLS content type: change_cipher_spec, alert,
/// handshake or application_data. A CoAP header never starts this way over
/// UDP (version bits) and only rarely over TCP.
#[cfg(any(feature = "transport_tcp", feature = "transport_udp"))]
pub(crate) fn is_tls_record(data: &[u8]) -> bool {
    matches!(data.first(), Some(20..=23))
}
