//! The single choke point for every application send and every wire receive.
//!
//! Sends are cloned, queued and processed on the send worker: serialized,
//! optionally handed to blockwise transfer, dispatched through the registry
//! and, for connectionless transports, registered for retransmission.
//! Receives are parsed, deduplicated, checked against retransmission and
//! blockwise state on the adapter's thread, then queued for the receive
//! worker which invokes the application callbacks.

mod receive;
mod send;
mod send_handle;

use std::sync::{Arc, Mutex, Weak};

use log::{debug, warn};

use ca_shared::{
    AddressedEnvelope, CaError, CaResult, DuplicateHistory, Envelope, NetworkCommand,
    SecureEndpoint, WorkerQueue,
};

pub use send_handle::SendHandle;

use crate::{
    collaborators::{BlockwiseTransfer, Retransmission, RetransmissionHooks},
    config::{ConnectivityConfig, DispatchMode},
    handlers::MessageHandlers,
    registry::{AdapterRegistry, PacketSink},
};
use send_handle::Completion;

/// Optional external engines the pipeline hands messages to
#[derive(Clone, Default)]
pub struct Collaborators {
    pub retransmission: Option<Arc<dyn Retransmission>>,
    pub blockwise: Option<Arc<dyn BlockwiseTransfer>>,
}

pub(crate) struct Outbound {
    message: AddressedEnvelope,
    completion: Option<Completion>,
    /// Set for blocks queued by the blockwise collaborator itself
    skip_blockwise: bool,
}

pub(crate) struct PipelineShared {
    registry: Arc<AdapterRegistry>,
    receive_queue: WorkerQueue<AddressedEnvelope>,
    history: Mutex<DuplicateHistory>,
    collaborators: Collaborators,
    dual_stack: bool,
    block_size: usize,
}

pub struct MessagePipeline {
    shared: Arc<PipelineShared>,
    send_queue: Arc<WorkerQueue<Outbound>>,
    handlers: Arc<MessageHandlers>,
    dispatch: DispatchMode,
}

impl MessagePipeline {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        config: &ConnectivityConfig,
        collaborators: Collaborators,
    ) -> Self {
        let handlers = Arc::new(MessageHandlers::new());
        let receive_handlers = handlers.clone();
        let receive_queue = WorkerQueue::new("ca-receive", move |message: AddressedEnvelope| {
            receive_handlers.dispatch(&message)
        });

        let shared = Arc::new(PipelineShared {
            registry,
            receive_queue,
            history: Mutex::new(DuplicateHistory::new()),
            collaborators,
            dual_stack: config.dual_stack,
            block_size: config.block_size,
        });

        let send_shared = shared.clone();
        let send_queue = Arc::new(WorkerQueue::new("ca-send", move |outbound: Outbound| {
            send_shared.process_send(outbound)
        }));

        Self {
            shared,
            send_queue,
            handlers,
            dispatch: config.dispatch,
        }
    }

    /// Starts the workers and the collaborators. On failure everything that
    /// was already started is stopped again.
    pub fn start(&self) -> CaResult<()> {
        let result = self.start_inner();
        if result.is_err() {
            self.stop();
        }
        result
    }

    fn start_inner(&self) -> CaResult<()> {
        self.send_queue.start()?;
        if self.dispatch == DispatchMode::Threaded {
            self.shared.receive_queue.start()?;
        }

        if let Some(blockwise) = &self.shared.collaborators.blockwise {
            blockwise.start(self.handle())?;
        }
        if let Some(retransmission) = &self.shared.collaborators.retransmission {
            retransmission.start(self.retransmission_hooks())?;
        }
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(retransmission) = &self.shared.collaborators.retransmission {
            retransmission.stop();
        }
        self.send_queue.stop();
        self.shared.receive_queue.stop();
        if let Some(blockwise) = &self.shared.collaborators.blockwise {
            blockwise.terminate();
        }
    }

    pub fn handlers(&self) -> &MessageHandlers {
        &self.handlers
    }

    /// The receiver adapters deliver wire data to
    pub fn sink(&self) -> Weak<dyn PacketSink> {
        let sink: Arc<dyn PacketSink> = self.shared.clone();
        Arc::downgrade(&sink)
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            shared: Arc::downgrade(&self.shared),
            send_queue: Arc::downgrade(&self.send_queue),
        }
    }

    fn retransmission_hooks(&self) -> RetransmissionHooks {
        let resend_shared = Arc::downgrade(&self.shared);
        let timeout_shared = Arc::downgrade(&self.shared);
        RetransmissionHooks {
            resend: Arc::new(move |endpoint, pdu, kind| match resend_shared.upgrade() {
                Some(shared) => shared.registry.send_unicast(endpoint, pdu, kind),
                None => Err(CaError::NotInitialized),
            }),
            timeout: Arc::new(move |endpoint, pdu| {
                if let Some(shared) = timeout_shared.upgrade() {
                    shared.on_retransmission_timeout(endpoint, pdu);
                }
            }),
        }
    }

    /// Queues a message for sending and returns immediately.
    ///
    /// The message is cloned; the caller keeps ownership of its copy. Network
    /// commands bypass the queue and are executed before this returns.
    pub fn submit(&self, message: &AddressedEnvelope) -> CaResult<SendHandle> {
        if self.shared.registry.selection().is_empty() {
            warn!("Send to {} rejected: no network selected", message.endpoint);
            return Err(CaError::failed("no network selected"));
        }

        let mut message = message.clone();
        match &mut message.envelope {
            Envelope::NetworkCommand(NetworkCommand::Disconnect) => {
                debug!("Disconnecting {}", message.endpoint);
                self.shared.registry.disconnect(&message.endpoint)?;
                return Ok(SendHandle::completed(Ok(())));
            }
            Envelope::Error(_) => {
                return Err(CaError::InvalidParam {
                    reason: "error envelopes are delivered, never sent",
                })
            }
            Envelope::Request(request) => send::assign_message_id(&message.endpoint, &mut request.info),
            Envelope::Response(response) => send::assign_message_id(&message.endpoint, &mut response.info),
        }

        let (handle, completion) = SendHandle::pending();
        self.send_queue.enqueue(Outbound {
            message,
            completion: Some(completion),
            skip_blockwise: false,
        })?;
        Ok(handle)
    }

    /// Delivers queued messages on the calling thread, for `DispatchMode::Polled`.
    /// Returns how many were delivered.
    pub fn dispatch_pending(&self) -> usize {
        let mut delivered = 0;
        while let Some(message) = self.shared.receive_queue.poll() {
            self.handlers.dispatch(&message);
            delivered += 1;
        }
        delivered
    }

    /// Entry point for wire data, identical to what adapters call.
    pub fn on_wire_data(&self, endpoint: &SecureEndpoint, data: &[u8]) -> CaResult<()> {
        self.shared.on_wire_data(endpoint, data)
    }
}

/// Lets collaborators feed the pipeline without keeping it alive
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Weak<PipelineShared>,
    send_queue: Weak<WorkerQueue<Outbound>>,
}

impl PipelineHandle {
    /// Queues a message for sending without offering it to blockwise transfer again.
    pub fn enqueue_send(&self, message: AddressedEnvelope) -> CaResult<()> {
        let send_queue = self.send_queue.upgrade().ok_or(CaError::NotInitialized)?;
        send_queue.enqueue(Outbound {
            message,
            completion: None,
            skip_blockwise: true,
        })?;
        Ok(())
    }

    /// Queues a message for delivery to the application callbacks.
    pub fn enqueue_receive(&self, message: AddressedEnvelope) -> CaResult<()> {
        let shared = self.shared.upgrade().ok_or(CaError::NotInitialized)?;
        shared.receive_queue.enqueue(message)?;
        Ok(())
    }
}
