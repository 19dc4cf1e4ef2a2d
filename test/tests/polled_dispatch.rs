//! Polled dispatch: nothing reaches the application until the caller asks,
//! and then everything arrives on the caller's thread in order.

use std::{
    sync::{Arc, Mutex},
    thread,
};

use ca_connectivity::{ConnectivityConfig, ContextBuilder, DispatchMode};
use ca_shared::{Endpoint, Method, RequestInfo, TransportAdapter, TransportFlags};
use ca_test::{init_logging, request_datagram, LocalAdapter};

#[test]
fn queued_input_is_read_and_dispatched_on_demand() {
    init_logging();
    let config = ConnectivityConfig {
        transports: TransportAdapter::empty(),
        dispatch: DispatchMode::Polled,
        ..ConnectivityConfig::default()
    };
    let (factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let context = ContextBuilder::new(config).adapter(factory).build().unwrap();
    context.select_network(TransportAdapter::IP).unwrap();

    let caller = thread::current().id();
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        context.register_handlers(
            Some(Arc::new(move |_endpoint: &Endpoint, request: &RequestInfo| {
                seen.lock()
                    .unwrap()
                    .push((thread::current().id(), request.info.message_id));
            })),
            None,
            None,
        );
    }

    let peer = Endpoint::new(TransportAdapter::IP, TransportFlags::IPV4, "10.1.1.1", 5683);
    for id in 1..=3u16 {
        ip.queue_inbound(&peer, &request_datagram(id, &[id as u8], Method::Get));
    }
    assert!(seen.lock().unwrap().is_empty());

    assert_eq!(context.handle_request_response(), Ok(3));
    assert!(ip.calls().contains(&"read_data"));
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, vec![(caller, 1), (caller, 2), (caller, 3)]);

    assert_eq!(context.handle_request_response(), Ok(0));
}

#[test]
fn threaded_mode_ignores_polling() {
    let config = ConnectivityConfig {
        transports: TransportAdapter::empty(),
        ..ConnectivityConfig::default()
    };
    let (factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let context = ContextBuilder::new(config).adapter(factory).build().unwrap();
    context.select_network(TransportAdapter::IP).unwrap();

    assert_eq!(context.handle_request_response(), Ok(0));
    assert!(!ip.calls().contains(&"read_data"));
}
