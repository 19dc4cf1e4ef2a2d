//! Outbound routing through the connectivity context
//!
//! A unicast to one transport only reaches that transport; multicast and
//! untargeted sends fan out to every selected adapter.

use std::time::Duration;

use ca_connectivity::{ConnectivityConfig, ContextBuilder, SendPolicy};
use ca_shared::{
    coap::HeaderForm, AddressedEnvelope, CaError, Code, DataKind, Endpoint, MessageInfo, Method,
    ResponseInfo, TransportAdapter, TransportFlags,
};
use ca_test::{decode_sent, init_logging, request_info, wait_until, LocalAdapter};

fn config(policy: SendPolicy) -> ConnectivityConfig {
    ConnectivityConfig {
        transports: TransportAdapter::empty(),
        send_policy: policy,
        ..ConnectivityConfig::default()
    }
}

#[test]
fn unicast_reaches_only_the_named_transport() {
    init_logging();
    let (ip_factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let (tcp_factory, tcp) = LocalAdapter::pair(TransportAdapter::TCP);
    let context = ContextBuilder::new(config(SendPolicy::BestEffort))
        .adapter(ip_factory)
        .adapter(tcp_factory)
        .build()
        .unwrap();
    context
        .select_network(TransportAdapter::IP | TransportAdapter::TCP)
        .unwrap();

    let endpoint = Endpoint::new(TransportAdapter::IP, TransportFlags::IPV4, "10.0.0.2", 5683);
    let request = request_info(Method::Get, "/oic/res", &[0x01, 0x02]);
    context.send_request(&endpoint, &request).unwrap().wait().unwrap();

    let sent = ip.sent();
    assert_eq!(sent.len(), 1);
    assert!(tcp.sent().is_empty());
    assert_eq!(sent[0].endpoint, endpoint);
    assert_eq!(sent[0].kind, DataKind::Request);
    assert!(!sent[0].multicast);

    let pdu = decode_sent(&sent[0].data, HeaderForm::Udp);
    assert_eq!(pdu.code, Method::Get.code());
    assert_eq!(pdu.token.as_bytes(), &[0x01, 0x02]);
    assert_ne!(pdu.message_id, 0);

    context.terminate();
}

#[test]
fn tcp_unicast_uses_the_stream_header() {
    let (tcp_factory, tcp) = LocalAdapter::pair(TransportAdapter::TCP);
    let context = ContextBuilder::new(config(SendPolicy::BestEffort))
        .adapter(tcp_factory)
        .build()
        .unwrap();
    context.select_network(TransportAdapter::TCP).unwrap();

    let endpoint = Endpoint::new(TransportAdapter::TCP, TransportFlags::IPV4, "10.0.0.2", 5683);
    let response = ResponseInfo::new(
        Code::CONTENT,
        MessageInfo {
            payload: b"hello".to_vec(),
            ..MessageInfo::default()
        },
    );
    context.send_response(&endpoint, &response).unwrap().wait().unwrap();

    let sent = tcp.sent();
    assert_eq!(sent.len(), 1);
    let pdu = decode_sent(&sent[0].data, HeaderForm::Tcp);
    assert_eq!(pdu.code, Code::CONTENT);
    assert_eq!(pdu.payload, b"hello");
    assert_eq!(pdu.message_id, 0);
}

#[test]
fn multicast_fans_out_to_every_selected_adapter() {
    let (ip_factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let (tcp_factory, tcp) = LocalAdapter::pair(TransportAdapter::TCP);
    let context = ContextBuilder::new(config(SendPolicy::BestEffort))
        .adapter(ip_factory)
        .adapter(tcp_factory)
        .build()
        .unwrap();
    context.select_network(TransportAdapter::IP).unwrap();

    let endpoint = Endpoint::new(
        TransportAdapter::empty(),
        TransportFlags::MULTICAST,
        "224.0.1.187",
        5683,
    );
    let request = request_info(Method::Get, "/oic/res", &[0x07]);
    context.send_request(&endpoint, &request).unwrap().wait().unwrap();

    assert_eq!(ip.sent().len(), 1);
    assert!(ip.sent()[0].multicast);
    // not selected
    assert!(tcp.sent().is_empty());
}

#[test]
fn best_effort_survives_one_failing_adapter() {
    let (ip_factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let (tcp_factory, tcp) = LocalAdapter::pair(TransportAdapter::TCP);
    let context = ContextBuilder::new(config(SendPolicy::BestEffort))
        .adapter(ip_factory)
        .adapter(tcp_factory)
        .build()
        .unwrap();
    context
        .select_network(TransportAdapter::IP | TransportAdapter::TCP)
        .unwrap();
    ip.set_fail_sends(true);

    let endpoint = Endpoint::new(TransportAdapter::empty(), TransportFlags::IPV4, "10.0.0.2", 5683);
    let request = request_info(Method::Post, "/a/light", &[]);
    let message = AddressedEnvelope::request(endpoint, request);
    assert_eq!(context.send(&message).unwrap().wait(), Ok(()));
    assert_eq!(tcp.sent().len(), 1);
    let pdu = decode_sent(&tcp.sent()[0].data, HeaderForm::Tcp);
    assert_eq!(pdu.code, Method::Post.code());
}

#[test]
fn untargeted_unicast_is_framed_per_transport() {
    let (ip_factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let (tcp_factory, tcp) = LocalAdapter::pair(TransportAdapter::TCP);
    let context = ContextBuilder::new(config(SendPolicy::BestEffort))
        .adapter(ip_factory)
        .adapter(tcp_factory)
        .build()
        .unwrap();
    context
        .select_network(TransportAdapter::IP | TransportAdapter::TCP)
        .unwrap();

    let endpoint = Endpoint::new(TransportAdapter::empty(), TransportFlags::IPV4, "10.0.0.2", 5683);
    let request = request_info(Method::Get, "/a", &[0x01, 0x02]);
    context.send_request(&endpoint, &request).unwrap().wait().unwrap();

    let datagram = decode_sent(&ip.sent()[0].data, HeaderForm::Udp);
    let stream = decode_sent(&tcp.sent()[0].data, HeaderForm::Tcp);
    assert_ne!(ip.sent()[0].data, tcp.sent()[0].data);
    for pdu in [&datagram, &stream] {
        assert_eq!(pdu.code, Method::Get.code());
        assert_eq!(pdu.token.as_bytes(), &[0x01, 0x02]);
    }
    assert_ne!(datagram.message_id, 0);
    assert_eq!(stream.message_id, 0);
}

#[test]
fn every_adapter_failing_is_a_send_failure() {
    let (ip_factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let context = ContextBuilder::new(config(SendPolicy::AbortOnFirstFailure))
        .adapter(ip_factory)
        .build()
        .unwrap();
    context.select_network(TransportAdapter::IP).unwrap();
    ip.set_fail_sends(true);

    let endpoint = Endpoint::new(TransportAdapter::IP, TransportFlags::IPV4, "10.0.0.2", 5683);
    let request = request_info(Method::Get, "/oic/d", &[0x01]);
    let result = context.send_request(&endpoint, &request).unwrap().wait();
    assert!(matches!(result, Err(CaError::SendFailed { .. })));
}

#[test]
fn send_without_selection_is_rejected() {
    let (ip_factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let context = ContextBuilder::new(config(SendPolicy::BestEffort))
        .adapter(ip_factory)
        .build()
        .unwrap();

    let endpoint = Endpoint::new(TransportAdapter::IP, TransportFlags::IPV4, "10.0.0.2", 5683);
    let request = request_info(Method::Get, "/oic/d", &[0x01]);
    assert!(context.send_request(&endpoint, &request).is_err());
    assert!(!wait_until(Duration::from_millis(50), || !ip.sent().is_empty()));
}
