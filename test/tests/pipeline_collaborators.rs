//! Send failures, retransmission and blockwise hand-off through the pipeline

use std::sync::{Arc, Mutex};

use ca_connectivity::{
    BlockwiseTransfer, ConnectivityConfig, ContextBuilder, DispatchMode, PipelineHandle,
    Retransmission, RetransmissionHooks,
};
use ca_shared::{
    coap::HeaderForm, AddressedEnvelope, CaError, CaResult, Code, DataKind, Endpoint, MessageInfo,
    MessageType, Method, RequestInfo, Token, TransportAdapter, TransportFlags,
};
use ca_test::{
    decode_sent, init_logging, request_datagram, request_info, response_datagram, LocalAdapter,
    MessageRecorder,
};

fn polled() -> ConnectivityConfig {
    ConnectivityConfig {
        transports: TransportAdapter::empty(),
        dispatch: DispatchMode::Polled,
        ..ConnectivityConfig::default()
    }
}

fn peer(adapter: TransportAdapter) -> Endpoint {
    Endpoint::new(adapter, TransportFlags::IPV4, "10.0.0.9", 5683)
}

#[derive(Default)]
struct FakeRetransmission {
    hooks: Mutex<Option<RetransmissionHooks>>,
    tracked: Mutex<Vec<Vec<u8>>>,
}

impl Retransmission for FakeRetransmission {
    fn start(&self, hooks: RetransmissionHooks) -> CaResult<()> {
        *self.hooks.lock().unwrap() = Some(hooks);
        Ok(())
    }

    fn stop(&self) {
        *self.hooks.lock().unwrap() = None;
    }

    fn sent(&self, _endpoint: &Endpoint, _kind: DataKind, pdu: &[u8]) -> CaResult<()> {
        self.tracked.lock().unwrap().push(pdu.to_vec());
        Ok(())
    }

    /// Acknowledges whatever was tracked last
    fn received(&self, _endpoint: &Endpoint, _pdu: &[u8]) -> CaResult<Option<Vec<u8>>> {
        Ok(self.tracked.lock().unwrap().pop())
    }
}

#[derive(Default)]
struct FakeBlockwise {
    pipeline: Mutex<Option<PipelineHandle>>,
    taken: Mutex<Vec<AddressedEnvelope>>,
}

impl BlockwiseTransfer for FakeBlockwise {
    fn start(&self, pipeline: PipelineHandle) -> CaResult<()> {
        *self.pipeline.lock().unwrap() = Some(pipeline);
        Ok(())
    }

    fn terminate(&self) {
        *self.pipeline.lock().unwrap() = None;
    }

    fn send(&self, message: &AddressedEnvelope) -> CaResult<()> {
        self.taken.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn receive(&self, _pdu: &ca_shared::coap::Pdu, _message: &AddressedEnvelope) -> CaResult<()> {
        Err(CaError::NotSupported)
    }
}

#[test]
fn worker_send_failure_becomes_an_error_envelope() {
    init_logging();
    let (factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let context = ContextBuilder::new(polled()).adapter(factory).build().unwrap();
    context.select_network(TransportAdapter::IP).unwrap();
    let recorder = MessageRecorder::new();
    recorder.register(&context);
    ip.set_fail_sends(true);

    let request = request_info(Method::Post, "/a/light", &[0x0A, 0x0B]);
    let result = context
        .send_request(&peer(TransportAdapter::IP), &request)
        .unwrap()
        .wait();
    assert!(result.is_err());

    assert_eq!(context.handle_request_response(), Ok(1));
    let errors = recorder.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0].1.result, CaError::SendFailed { .. }));
    assert_eq!(errors[0].1.info.token.as_bytes(), &[0x0A, 0x0B]);
    assert_eq!(errors[0].0, peer(TransportAdapter::IP));
}

#[test]
fn adapter_reported_failure_becomes_an_error_envelope() {
    let (factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let context = ContextBuilder::new(polled()).adapter(factory).build().unwrap();
    context.select_network(TransportAdapter::IP).unwrap();
    let recorder = MessageRecorder::new();
    recorder.register(&context);

    let bytes = request_datagram(99, &[0x33], Method::Get);
    ip.fail_later(&peer(TransportAdapter::IP), &bytes, CaError::send_failed("socket closed"));

    assert_eq!(context.handle_request_response(), Ok(1));
    let errors = recorder.errors();
    assert_eq!(errors[0].1.info.message_id, 99);
    assert_eq!(errors[0].1.result, CaError::send_failed("socket closed"));
}

#[test]
fn multicast_kind_to_a_stream_endpoint_reports_the_failure() {
    let (factory, tcp) = LocalAdapter::pair(TransportAdapter::TCP);
    let context = ContextBuilder::new(polled()).adapter(factory).build().unwrap();
    context.select_network(TransportAdapter::TCP).unwrap();
    let recorder = MessageRecorder::new();
    recorder.register(&context);
    tcp.set_fail_sends(true);

    let request = request_info(Method::Get, "/oic/res", &[0x5E]);
    let message = AddressedEnvelope::multicast_request(peer(TransportAdapter::TCP), request);
    assert!(context.send(&message).unwrap().wait().is_err());

    assert_eq!(context.handle_request_response(), Ok(1));
    let errors = recorder.errors();
    assert!(matches!(errors[0].1.result, CaError::SendFailed { .. }));
    assert_eq!(errors[0].1.info.token.as_bytes(), &[0x5E]);
}

#[test]
fn unparseable_adapter_failure_is_still_reported() {
    let (factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let context = ContextBuilder::new(polled()).adapter(factory).build().unwrap();
    context.select_network(TransportAdapter::IP).unwrap();
    let recorder = MessageRecorder::new();
    recorder.register(&context);

    ip.fail_later(&peer(TransportAdapter::IP), &[0xFF], CaError::send_failed("reset"));

    assert_eq!(context.handle_request_response(), Ok(1));
    let errors = recorder.errors();
    assert_eq!(errors[0].1.result, CaError::send_failed("reset"));
    assert_eq!(errors[0].1.info, MessageInfo::default());
}

#[test]
fn retransmission_tracks_connectionless_unicast_only() {
    let retransmission = Arc::new(FakeRetransmission::default());
    let (ip_factory, _ip) = LocalAdapter::pair(TransportAdapter::IP);
    let (tcp_factory, _tcp) = LocalAdapter::pair(TransportAdapter::TCP);
    let context = ContextBuilder::new(polled())
        .adapter(ip_factory)
        .adapter(tcp_factory)
        .retransmission(retransmission.clone())
        .build()
        .unwrap();
    context
        .select_network(TransportAdapter::IP | TransportAdapter::TCP)
        .unwrap();
    assert!(retransmission.hooks.lock().unwrap().is_some());

    let request = request_info(Method::Get, "/oic/d", &[0x01]);
    context.send_request(&peer(TransportAdapter::IP), &request).unwrap().wait().unwrap();
    context.send_request(&peer(TransportAdapter::TCP), &request).unwrap().wait().unwrap();

    assert_eq!(retransmission.tracked.lock().unwrap().len(), 1);

    // an untargeted unicast is tracked in the datagram form only
    let untargeted = Endpoint::new(TransportAdapter::empty(), TransportFlags::IPV4, "10.0.0.9", 5683);
    context.send_request(&untargeted, &request).unwrap().wait().unwrap();
    let tracked = retransmission.tracked.lock().unwrap().clone();
    assert_eq!(tracked.len(), 2);
    assert_eq!(decode_sent(&tracked[1], HeaderForm::Udp).token.as_bytes(), &[0x01]);

    context.terminate();
    assert!(retransmission.hooks.lock().unwrap().is_none());
}

#[test]
fn empty_ack_recovers_the_original_token() {
    let retransmission = Arc::new(FakeRetransmission::default());
    let (factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let context = ContextBuilder::new(polled())
        .adapter(factory)
        .retransmission(retransmission.clone())
        .build()
        .unwrap();
    context.select_network(TransportAdapter::IP).unwrap();
    let recorder = MessageRecorder::new();
    recorder.register(&context);

    let mut request = request_info(Method::Get, "/oic/res", &[0xC0, 0xFF, 0xEE]);
    request.info.msg_type = MessageType::Confirmable;
    request.info.message_id = 500;
    context.send_request(&peer(TransportAdapter::IP), &request).unwrap().wait().unwrap();

    let ack = response_datagram(500, &[], Code::EMPTY, &[]);
    ip.inject(&peer(TransportAdapter::IP), &ack);

    assert_eq!(context.handle_request_response(), Ok(1));
    let responses = recorder.responses();
    assert_eq!(responses[0].1.result, Code::EMPTY);
    assert_eq!(responses[0].1.info.token, Token::new(&[0xC0, 0xFF, 0xEE]).unwrap());
}

#[test]
fn retransmission_timeout_reaches_the_response_handler() {
    let retransmission = Arc::new(FakeRetransmission::default());
    let (factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let context = ContextBuilder::new(polled())
        .adapter(factory)
        .retransmission(retransmission.clone())
        .build()
        .unwrap();
    context.select_network(TransportAdapter::IP).unwrap();
    let recorder = MessageRecorder::new();
    recorder.register(&context);

    let request = request_info(Method::Get, "/oic/res", &[0x42]);
    context.send_request(&peer(TransportAdapter::IP), &request).unwrap().wait().unwrap();
    let sent = ip.sent()[0].data.clone();

    let hooks = retransmission.hooks.lock().unwrap().clone().unwrap();
    assert_eq!((hooks.resend)(&peer(TransportAdapter::IP), &sent, DataKind::Request), Ok(sent.len()));
    assert_eq!(ip.sent().len(), 2);

    (hooks.timeout)(&peer(TransportAdapter::IP), &sent);
    assert_eq!(context.handle_request_response(), Ok(1));
    let responses = recorder.responses();
    assert_eq!(responses[0].1.result, Code::RETRANSMIT_TIMEOUT);
    assert_eq!(responses[0].1.info.token.as_bytes(), &[0x42]);
}

#[test]
fn large_payloads_go_to_blockwise_and_blocks_bypass_it() {
    let blockwise = Arc::new(FakeBlockwise::default());
    let (factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let context = ContextBuilder::new(polled())
        .adapter(factory)
        .blockwise(blockwise.clone())
        .build()
        .unwrap();
    context.select_network(TransportAdapter::IP).unwrap();

    let request = RequestInfo::new(
        Method::Put,
        MessageInfo {
            payload: vec![0x5A; 4096],
            token: Token::new(&[0x01]).unwrap(),
            ..MessageInfo::default()
        },
    );
    context.send_request(&peer(TransportAdapter::IP), &request).unwrap().wait().unwrap();
    assert!(ip.sent().is_empty());
    assert_eq!(blockwise.taken.lock().unwrap().len(), 1);

    // The collaborator sends its first block back through the pipeline
    let mut block = blockwise.taken.lock().unwrap()[0].clone();
    if let ca_shared::Envelope::Request(request) = &mut block.envelope {
        request.info.payload.truncate(1024);
        request.info.payload.push(0x00);
    }
    let handle = blockwise.pipeline.lock().unwrap().clone().unwrap();
    handle.enqueue_send(block).unwrap();

    assert!(ca_test::wait_until(ca_test::WAIT, || ip.sent().len() == 1));
    let pdu = decode_sent(&ip.sent()[0].data, HeaderForm::Udp);
    assert_eq!(pdu.payload.len(), 1025);
    assert_eq!(blockwise.taken.lock().unwrap().len(), 1);
}

#[test]
fn small_payloads_skip_blockwise() {
    let blockwise = Arc::new(FakeBlockwise::default());
    let (factory, ip) = LocalAdapter::pair(TransportAdapter::IP);
    let context = ContextBuilder::new(polled())
        .adapter(factory)
        .blockwise(blockwise.clone())
        .build()
        .unwrap();
    context.select_network(TransportAdapter::IP).unwrap();

    let request = request_info(Method::Get, "/oic/res", &[0x01]);
    context.send_request(&peer(TransportAdapter::IP), &request).unwrap().wait().unwrap();

    assert_eq!(ip.sent().len(), 1);
    assert!(blockwise.taken.lock().unwrap().is_empty());
}
