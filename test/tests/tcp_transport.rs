//! CoAP over TCP through two connectivity contexts on loopback

use std::net::TcpListener;

use ca_connectivity::{ConnectivityConfig, ConnectivityContext, ContextBuilder, TcpConfig};
use ca_shared::{
    CaError, Code, Endpoint, MessageInfo, Method, ResponseInfo, TransportAdapter, TransportFlags,
    COAP_PORT,
};
use ca_test::{init_logging, request_info, wait_until, MessageRecorder, MonitorRecorder, WAIT};

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn tcp_context(port: u16) -> ConnectivityContext {
    let config = ConnectivityConfig {
        transports: TransportAdapter::TCP,
        tcp: TcpConfig {
            ipv6_enabled: false,
            ipv4_port: port,
            ..TcpConfig::default()
        },
        ..ConnectivityConfig::default()
    };
    let context = ContextBuilder::new(config).build().unwrap();
    context.select_network(TransportAdapter::TCP).unwrap();
    context
}

#[test]
fn multicast_over_tcp_is_refused() {
    init_logging();
    let context = tcp_context(0);
    let recorder = MessageRecorder::new();
    recorder.register(&context);

    let group = Endpoint::new(
        TransportAdapter::TCP,
        TransportFlags::IPV4 | TransportFlags::MULTICAST,
        "224.0.1.187",
        COAP_PORT,
    );
    let request = request_info(Method::Get, "/oic/res", &[0x01]);
    let result = context.send_request(&group, &request).unwrap().wait();
    assert!(matches!(result, Err(CaError::SendFailed { .. })));

    assert!(wait_until(WAIT, || recorder.errors().len() == 1));
    assert_eq!(recorder.errors()[0].1.info.token.as_bytes(), &[0x01]);
    context.terminate();
}

#[test]
fn request_and_response_cross_a_loopback_session() {
    init_logging();
    let port = free_port();
    let server = tcp_context(port);
    server.start_listening_server().unwrap();
    let server_messages = MessageRecorder::new();
    server_messages.register(&server);
    let server_monitor = MonitorRecorder::new();
    let (adapter_state, connection_state) = server_monitor.callbacks();
    server.register_network_monitor(Some(adapter_state), Some(connection_state));

    let client = tcp_context(0);
    let client_messages = MessageRecorder::new();
    client_messages.register(&client);

    let server_endpoint = Endpoint::new(TransportAdapter::TCP, TransportFlags::IPV4, "127.0.0.1", port);
    let request = request_info(Method::Get, "/a/light", &[0xA1, 0xA2]);
    client.send_request(&server_endpoint, &request).unwrap().wait().unwrap();

    assert!(wait_until(WAIT, || server_messages.requests().len() == 1));
    let (peer, received) = server_messages.requests().remove(0);
    assert_eq!(received.method, Method::Get);
    assert_eq!(received.info.resource_uri.as_deref(), Some("/a/light"));
    assert_eq!(received.info.token.as_bytes(), &[0xA1, 0xA2]);
    assert_eq!(peer.adapter, TransportAdapter::TCP);
    assert_eq!(server_monitor.connections(), vec![(peer.clone(), true)]);

    let response = ResponseInfo::new(
        Code::CONTENT,
        MessageInfo {
            token: received.info.token.clone(),
            payload: b"{\"on\":true}".to_vec(),
            ..MessageInfo::default()
        },
    );
    server.send_response(&peer, &response).unwrap().wait().unwrap();

    assert!(wait_until(WAIT, || client_messages.responses().len() == 1));
    let (from, answer) = client_messages.responses().remove(0);
    assert_eq!(from.port, port);
    assert_eq!(answer.result, Code::CONTENT);
    assert_eq!(answer.info.token.as_bytes(), &[0xA1, 0xA2]);
    assert_eq!(answer.info.payload, b"{\"on\":true}".to_vec());

    client.terminate();
    assert!(wait_until(WAIT, || server_monitor.connections().len() == 2));
    assert_eq!(server_monitor.connections()[1], (peer, false));
    server.terminate();
}
