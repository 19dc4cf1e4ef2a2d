//! Narrow contracts for the engines that live outside the core:
//! retransmission over unreliable transports, blockwise transfer, and
//! secure session handling. Each is optional; without one the pipeline
//! behaves as if the collaborator answered `NotSupported`.

use std::sync::Arc;

use ca_shared::{coap::Pdu, AddressedEnvelope, CaResult, DataKind, Endpoint, RemoteIdentity};

use crate::pipeline::PipelineHandle;

/// Sends already-encoded bytes to one peer through the registry
pub type ResendFn = Arc<dyn Fn(&Endpoint, &[u8], DataKind) -> CaResult<usize> + Send + Sync>;

/// Reports that the retransmission engine gave up on a message
pub type TimeoutFn = Arc<dyn Fn(&Endpoint, &[u8]) + Send + Sync>;

#[derive(Clone)]
pub struct RetransmissionHooks {
    pub resend: ResendFn,
    pub timeout: TimeoutFn,
}

pub trait Retransmission: Send + Sync {
    fn start(&self, hooks: RetransmissionHooks) -> CaResult<()>;

    fn stop(&self);

    /// Tracks an outbound message for resend. `NotSupported` means the
    /// message needs no tracking.
    fn sent(&self, endpoint: &Endpoint, kind: DataKind, pdu: &[u8]) -> CaResult<()>;

    /// Called for every inbound message. Returns the originally sent PDU when
    /// `pdu` acknowledges a tracked message.
    fn received(&self, endpoint: &Endpoint, pdu: &[u8]) -> CaResult<Option<Vec<u8>>>;
}

pub trait BlockwiseTransfer: Send + Sync {
    /// Hands the collaborator a way to feed the pipeline's queues.
    fn start(&self, pipeline: PipelineHandle) -> CaResult<()>;

    fn terminate(&self);

    /// Takes over an outbound message too large for one block. `NotSupported`
    /// returns it to the normal send path.
    fn send(&self, message: &AddressedEnvelope) -> CaResult<()>;

    /// Adds a block option to a PDU about to be sent, if the exchange needs one.
    fn add_block_option(&self, _pdu: &mut Pdu, _message: &AddressedEnvelope) -> CaResult<()> {
        Ok(())
    }

    /// Consumes an inbound PDU carrying a block option. `Ok` means the
    /// collaborator owns it and delivers the reassembled message later through
    /// its `PipelineHandle`; `NotSupported` delivers this one as is.
    fn receive(&self, pdu: &Pdu, message: &AddressedEnvelope) -> CaResult<()>;
}

/// Outcome of feeding one record to a secure session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Decrypted {
    /// Application data, absent while the handshake is still running
    pub plaintext: Option<Vec<u8>>,
    /// Peer identity once the session is established
    pub identity: Option<RemoteIdentity>,
    /// Records to write back to the peer (handshake flights, alerts)
    pub outgoing: Vec<Vec<u8>>,
}

pub trait SecureSessionHandler: Send + Sync {
    fn decrypt(&self, endpoint: &Endpoint, record: &[u8]) -> CaResult<Decrypted>;

    fn encrypt(&self, endpoint: &Endpoint, plaintext: &[u8]) -> CaResult<Vec<u8>>;

    /// The transport closed the connection bound to `endpoint`.
    fn close(&self, _endpoint: &Endpoint) {}
}
