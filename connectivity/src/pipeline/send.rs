use log::{debug, warn};

use ca_shared::{
    coap::{HeaderForm, Pdu},
    AddressedEnvelope, CaError, CaResult, Endpoint, Envelope, ErrorInfo, MessageInfo, SendKind,
    TransportAdapter,
};

use crate::pipeline::{Outbound, PipelineShared};

/// Connectionless transports correlate by message id, so an unset id gets a
/// random one before the message is queued.
pub(crate) fn assign_message_id(endpoint: &Endpoint, info: &mut MessageInfo) {
    if info.message_id == 0 && !endpoint.adapter.is_coap_over_tcp() {
        info.message_id = fastrand::u16(1..);
    }
}

impl PipelineShared {
    pub(crate) fn process_send(&self, outbound: Outbound) {
        let Outbound {
            message,
            completion,
            skip_blockwise,
        } = outbound;

        let result = self.send_message(&message, skip_blockwise);
        if let Err(error) = &result {
            warn!("Send to {} failed: {}", message.endpoint, error);
        }
        if let Some(completion) = completion {
            let _ = completion.send(result);
        }
    }

    fn send_message(&self, message: &AddressedEnvelope, skip_blockwise: bool) -> CaResult<()> {
        let endpoint = &message.endpoint;
        let transports = endpoint.adapter.or_all(self.registry.selection().mask());
        let blockwise = self
            .collaborators
            .blockwise
            .as_ref()
            .filter(|_| !skip_blockwise && transports.supports_blockwise());

        if let Some(blockwise) = blockwise {
            let payload_len = message.envelope.info().map_or(0, |info| info.payload.len());
            if payload_len > self.block_size {
                match blockwise.send(message) {
                    Ok(()) => {
                        debug!("{} byte payload to {} handed to blockwise transfer", payload_len, endpoint);
                        return Ok(());
                    }
                    Err(CaError::NotSupported) => {}
                    Err(error) => {
                        self.report_send_error_info(message, error.clone());
                        return Err(error);
                    }
                }
            }
        }

        let frames = match self.encode_frames(message, transports, blockwise.is_some()) {
            Ok(frames) => frames,
            Err(error) => {
                self.report_send_error_info(message, error.clone());
                return Err(error);
            }
        };

        let kind = message.envelope.data_kind();
        let sent = match message.send_kind {
            SendKind::Multicast => self.registry.send_multicast(endpoint, frames.udp(), kind),
            SendKind::Unicast => {
                self.registry
                    .send_unicast_framed(endpoint, kind, |transport| frames.for_transport(transport))
            }
        };
        if let Err(error) = sent {
            self.report_send_error_info(message, error.clone());
            return Err(error);
        }

        // reliable transports never retransmit
        let connectionless = (transports & self.registry.selection().mask()).difference(TransportAdapter::TCP);
        if message.send_kind == SendKind::Unicast && !connectionless.is_empty() {
            if let Some(retransmission) = &self.collaborators.retransmission {
                let mut tracked = endpoint.clone();
                tracked.adapter = connectionless;
                match retransmission.sent(&tracked, kind, frames.udp()) {
                    Ok(()) | Err(CaError::NotSupported) => {}
                    Err(error) => {
                        warn!("Retransmission tracking for {} failed: {}", endpoint, error);
                        return Err(error);
                    }
                }
            }
        }
        Ok(())
    }

    /// Encodes the message once per header form its targets need. Multicast
    /// always goes out in the datagram form.
    fn encode_frames(
        &self,
        message: &AddressedEnvelope,
        transports: TransportAdapter,
        block_option: bool,
    ) -> CaResult<Frames> {
        let needs_stream = message.send_kind == SendKind::Unicast && transports.contains(TransportAdapter::TCP);
        let needs_datagram = message.send_kind == SendKind::Multicast
            || !transports.difference(TransportAdapter::TCP).is_empty();

        let mut frames = Frames::default();
        if needs_datagram {
            frames.udp = self.encode(message, HeaderForm::Udp, block_option)?;
        }
        if needs_stream {
            frames.tcp = self.encode(message, HeaderForm::Tcp, block_option)?;
        }
        Ok(frames)
    }

    fn encode(&self, message: &AddressedEnvelope, form: HeaderForm, block_option: bool) -> CaResult<Vec<u8>> {
        let mut pdu = Pdu::from_envelope(&message.envelope)?;
        if block_option {
            if let Some(blockwise) = &self.collaborators.blockwise {
                blockwise.add_block_option(&mut pdu, message)?;
            }
        }
        Ok(pdu.encode(form)?)
    }

    /// Turns a failed send of already encoded bytes into an Error envelope
    /// for the application. Bytes that parse in neither header form still
    /// produce an envelope, without message fields.
    pub(crate) fn report_send_error(&self, endpoint: &Endpoint, data: &[u8], error: CaError) {
        let expected = if endpoint.is_multicast() {
            HeaderForm::Udp
        } else {
            HeaderForm::for_transport(endpoint.adapter)
        };
        let other = match expected {
            HeaderForm::Udp => HeaderForm::Tcp,
            HeaderForm::Tcp => HeaderForm::Udp,
        };
        let info = match Pdu::decode(data, expected).or_else(|_| Pdu::decode(data, other)) {
            Ok(pdu) => pdu.into_info(None).1,
            Err(parse_error) => {
                warn!("Failed send to {} is unparseable: {}", endpoint, parse_error);
                MessageInfo::default()
            }
        };
        self.push_error(endpoint.clone(), ErrorInfo { result: error, info });
    }

    /// Same as `report_send_error` when the message itself is at hand.
    fn report_send_error_info(&self, message: &AddressedEnvelope, error: CaError) {
        let info = message.envelope.info().cloned().unwrap_or_default();
        self.push_error(message.endpoint.clone(), ErrorInfo { result: error, info });
    }

    fn push_error(&self, endpoint: Endpoint, error: ErrorInfo) {
        let envelope = AddressedEnvelope::new(endpoint, SendKind::Unicast, Envelope::Error(error));
        if let Err(queue_error) = self.receive_queue.enqueue(envelope) {
            warn!("Error envelope dropped: {}", queue_error);
        }
    }
}

/// The encodings of one outbound message, one per header form
#[derive(Default)]
struct Frames {
    udp: Vec<u8>,
    tcp: Vec<u8>,
}

impl Frames {
    fn udp(&self) -> &[u8] {
        &self.udp
    }

    fn for_transport(&self, transport: TransportAdapter) -> &[u8] {
        match HeaderForm::for_transport(transport) {
            HeaderForm::Udp => &self.udp,
            HeaderForm::Tcp => &self.tcp,
        }
    }
}
