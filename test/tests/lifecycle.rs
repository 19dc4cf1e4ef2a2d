//! Initialization gate, network selection and monitors

use ca_connectivity::{Connectivity, ConnectivityConfig, ContextBuilder, DispatchMode};
use ca_shared::{CaError, Endpoint, NetworkCommand, TransportAdapter, TransportFlags};
use ca_test::{init_logging, request_info, LocalAdapter, MonitorRecorder};

fn local_only() -> ConnectivityConfig {
    ConnectivityConfig {
        transports: TransportAdapter::empty(),
        dispatch: DispatchMode::Polled,
        ..ConnectivityConfig::default()
    }
}

#[test]
fn uninitialized_core_rejects_everything() {
    let connectivity = Connectivity::new();
    let endpoint = Endpoint::new(TransportAdapter::IP, TransportFlags::IPV4, "10.0.0.2", 5683);
    let request = request_info(ca_shared::Method::Get, "/oic/res", &[0x01]);

    assert!(!connectivity.is_initialized());
    assert_eq!(connectivity.select_network(TransportAdapter::IP), Err(CaError::NotInitialized));
    assert!(matches!(
        connectivity.send_request(&endpoint, &request),
        Err(CaError::NotInitialized)
    ));
    assert_eq!(connectivity.handle_request_response(), Err(CaError::NotInitialized));
    assert_eq!(connectivity.network_info(), Err(CaError::NotInitialized));
}

#[test]
fn initialize_then_terminate_closes_the_gate_again() {
    init_logging();
    let (factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let connectivity = Connectivity::new();
    connectivity
        .initialize_with(ContextBuilder::new(local_only()).adapter(factory))
        .unwrap();
    assert!(connectivity.is_initialized());

    connectivity.select_network(TransportAdapter::IP).unwrap();
    assert_eq!(connectivity.generate_token(8).unwrap().len(), 8);

    connectivity.terminate();
    assert!(!connectivity.is_initialized());
    assert_eq!(ip.calls().last(), Some(&"terminate"));
    assert_eq!(connectivity.select_network(TransportAdapter::IP), Err(CaError::NotInitialized));
}

#[test]
fn select_and_unselect_drive_the_adapter() {
    let (factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let context = ContextBuilder::new(local_only()).adapter(factory).build().unwrap();

    context.select_network(TransportAdapter::IP).unwrap();
    // already selected, nothing to start
    context.select_network(TransportAdapter::IP).unwrap();
    assert_eq!(context.registry().selection().mask(), TransportAdapter::IP);

    context.unselect_network(TransportAdapter::IP).unwrap();
    assert!(context.registry().selection().is_empty());
    assert!(context.unselect_network(TransportAdapter::IP).is_err());

    assert_eq!(ip.calls(), vec!["start_adapter", "stop_adapter"]);
}

#[test]
fn selecting_an_unavailable_transport_selects_nothing() {
    let (factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let context = ContextBuilder::new(local_only()).adapter(factory).build().unwrap();

    assert_eq!(
        context.select_network(TransportAdapter::IP | TransportAdapter::GATT_BTLE),
        Err(CaError::NotSupported)
    );
    assert!(context.registry().selection().is_empty());
    assert!(ip.calls().is_empty());

    assert!(matches!(
        context.select_network(TransportAdapter::empty()),
        Err(CaError::InvalidParam { .. })
    ));
}

#[test]
fn monitors_see_adapter_and_connection_changes() {
    let (factory, tcp) = LocalAdapter::pair(TransportAdapter::TCP);
    let context = ContextBuilder::new(local_only()).adapter(factory).build().unwrap();
    let recorder = MonitorRecorder::new();
    let (adapter_state, connection_state) = recorder.callbacks();
    let id = context.register_network_monitor(Some(adapter_state), Some(connection_state));

    context.select_network(TransportAdapter::TCP).unwrap();
    let peer = Endpoint::new(TransportAdapter::TCP, TransportFlags::IPV4, "10.0.0.7", 5683);
    tcp.connection_changed(&peer, true);
    tcp.connection_changed(&peer, false);
    context.unselect_network(TransportAdapter::TCP).unwrap();

    assert_eq!(
        recorder.adapters(),
        vec![(TransportAdapter::TCP, true), (TransportAdapter::TCP, false)]
    );
    assert_eq!(recorder.connections(), vec![(peer.clone(), true), (peer, false)]);

    assert!(context.unregister_network_monitor(id));
    context.select_network(TransportAdapter::TCP).unwrap();
    assert_eq!(recorder.adapters().len(), 2);
}

#[test]
fn disconnect_command_reaches_the_owning_adapter() {
    let (ip_factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let (tcp_factory, tcp) = LocalAdapter::pair(TransportAdapter::TCP);
    let context = ContextBuilder::new(local_only())
        .adapter(ip_factory)
        .adapter(tcp_factory)
        .build()
        .unwrap();
    context
        .select_network(TransportAdapter::IP | TransportAdapter::TCP)
        .unwrap();

    let peer = Endpoint::new(TransportAdapter::TCP, TransportFlags::IPV4, "10.0.0.7", 5683);
    context
        .send_network_command(&peer, NetworkCommand::Disconnect)
        .unwrap();

    assert_eq!(tcp.calls().last(), Some(&"disconnect"));
    assert!(!ip.calls().contains(&"disconnect"));
}

#[test]
fn listening_and_discovery_reach_selected_adapters() {
    let (factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let context = ContextBuilder::new(local_only()).adapter(factory).build().unwrap();
    assert!(context.start_listening_server().is_err());

    context.select_network(TransportAdapter::IP).unwrap();
    context.start_listening_server().unwrap();
    context.start_discovery_server().unwrap();
    context.stop_listening_server().unwrap();

    assert_eq!(
        ip.calls(),
        vec!["start_adapter", "start_listening", "start_discovery", "stop_listening"]
    );
}
