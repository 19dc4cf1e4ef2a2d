use std::sync::PoisonError;

use log::{debug, trace, warn};

use ca_shared::{
    coap::{HeaderForm, Pdu},
    AddressedEnvelope, CaError, CaResult, Code, Endpoint, Envelope, Method, ResponseInfo,
    SecureEndpoint, SendKind, Token, TransportAdapter,
};

use crate::{pipeline::PipelineShared, registry::PacketSink};

impl PacketSink for PipelineShared {
    fn on_wire_data(&self, secure_endpoint: &SecureEndpoint, data: &[u8]) -> CaResult<()> {
        if data.is_empty() {
            return Err(CaError::InvalidParam {
                reason: "zero-length wire data",
            });
        }
        let endpoint = &secure_endpoint.endpoint;
        let form = HeaderForm::for_transport(endpoint.adapter);

        let pdu = match Pdu::decode(data, form) {
            Ok(pdu) => pdu,
            Err(error) => {
                warn!("Dropping unparseable message from {}: {}", endpoint, error);
                return Err(error.into());
            }
        };
        trace!("Received {:?} from {} ({} bytes)", pdu.code, endpoint, data.len());

        let is_request = Method::from_code(pdu.code).is_some();
        if is_request && self.is_duplicate(endpoint, &pdu) {
            debug!(
                "Dropping dual-stack duplicate request {} from {}",
                pdu.message_id, endpoint
            );
            return Ok(());
        }

        let recovered_token = self.acknowledged_token(endpoint, data, &pdu, form);

        let block_pdu = match &self.collaborators.blockwise {
            Some(_) if endpoint.adapter.supports_blockwise() && pdu.has_block_option() => Some(pdu.clone()),
            _ => None,
        };

        let mut envelope = pdu.into_envelope(secure_endpoint.identity.clone());
        if let (Envelope::Response(response), Some(token)) = (&mut envelope, recovered_token) {
            if response.info.token.is_empty() {
                response.info.token = token;
            }
        }
        let send_kind = if endpoint.is_multicast() {
            SendKind::Multicast
        } else {
            SendKind::Unicast
        };
        let message = AddressedEnvelope::new(endpoint.clone(), send_kind, envelope);

        if let (Some(blockwise), Some(block_pdu)) = (&self.collaborators.blockwise, block_pdu) {
            match blockwise.receive(&block_pdu, &message) {
                Ok(()) => return Ok(()),
                Err(CaError::NotSupported) => {}
                Err(error) => {
                    warn!("Blockwise transfer rejected message from {}: {}", endpoint, error);
                    return Err(error);
                }
            }
        }

        self.receive_queue.enqueue(message)?;
        Ok(())
    }

    fn on_send_error(&self, endpoint: &Endpoint, data: &[u8], error: CaError) {
        self.report_send_error(endpoint, data, error);
    }
}

impl PipelineShared {
    /// Dual-stack duplicates only happen on the connectionless IP transport.
    fn is_duplicate(&self, endpoint: &Endpoint, pdu: &Pdu) -> bool {
        if !self.dual_stack || endpoint.adapter != TransportAdapter::IP {
            return false;
        }
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check_and_record(pdu.message_id, &pdu.token, endpoint.flags)
    }

    /// Lets the retransmission engine match the message against what it is
    /// tracking. An empty ACK carries no token, so it is taken from the
    /// original message the engine hands back.
    fn acknowledged_token(
        &self,
        endpoint: &Endpoint,
        data: &[u8],
        pdu: &Pdu,
        form: HeaderForm,
    ) -> Option<Token> {
        if endpoint.adapter.is_coap_over_tcp() {
            return None;
        }
        let retransmission = self.collaborators.retransmission.as_ref()?;
        match retransmission.received(endpoint, data) {
            Ok(Some(original)) if pdu.code.is_empty() => match Pdu::decode(&original, form) {
                Ok(original) => Some(original.token),
                Err(error) => {
                    warn!("Retransmission returned an unparseable message: {}", error);
                    None
                }
            },
            Ok(_) | Err(CaError::NotSupported) => None,
            Err(error) => {
                warn!("Retransmission bookkeeping for {} failed: {}", endpoint, error);
                None
            }
        }
    }

    /// The retransmission engine gave up; the application sees a response
    /// with `RETRANSMIT_TIMEOUT` carrying the original token.
    pub(crate) fn on_retransmission_timeout(&self, endpoint: &Endpoint, pdu: &[u8]) {
        let form = HeaderForm::for_transport(endpoint.adapter);
        let info = match Pdu::decode(pdu, form) {
            Ok(pdu) => pdu.into_info(None).1,
            Err(error) => {
                warn!("Timed out message to {} is unparseable: {}", endpoint, error);
                return;
            }
        };
        debug!("Retransmission to {} timed out, token {:?}", endpoint, info.token);
        let response = ResponseInfo::new(Code::RETRANSMIT_TIMEOUT, info);
        let message = AddressedEnvelope::response(endpoint.clone(), response);
        if let Err(error) = self.receive_queue.enqueue(message) {
            warn!("Timeout response dropped: {}", error);
        }
    }
}
