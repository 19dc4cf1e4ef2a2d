use std::sync::Arc;

use log::{debug, info, warn};

use ca_shared::{
    AddressedEnvelope, CaError, CaResult, Endpoint, Envelope, NetworkCommand, RequestInfo,
    ResponseInfo, SendKind, Token, TransportAdapter,
};

use crate::{
    adapter::{AdapterContext, AdapterFactory},
    collaborators::{BlockwiseTransfer, Retransmission, SecureSessionHandler},
    config::{ConnectivityConfig, DispatchMode},
    handlers::{ErrorCallback, RequestCallback, ResponseCallback},
    monitor::{AdapterStateCallback, ConnectionStateCallback, MonitorId, NetworkMonitors},
    pipeline::{Collaborators, MessagePipeline, SendHandle},
    registry::{AdapterRegistry, RegistryEvents},
    transport,
};

/// Collects everything `initialize()` wires together
pub struct ContextBuilder {
    config: ConnectivityConfig,
    factories: Vec<Box<dyn AdapterFactory>>,
    collaborators: Collaborators,
    security: Option<Arc<dyn SecureSessionHandler>>,
}

impl ContextBuilder {
    pub fn new(config: ConnectivityConfig) -> Self {
        Self {
            config,
            factories: Vec::new(),
            collaborators: Collaborators::default(),
            security: None,
        }
    }

    /// Adds an adapter on top of the built-in transports named in the config.
    pub fn adapter(mut self, factory: impl AdapterFactory + 'static) -> Self {
        self.factories.push(Box::new(factory));
        self
    }

    pub fn retransmission(mut self, retransmission: Arc<dyn Retransmission>) -> Self {
        self.collaborators.retransmission = Some(retransmission);
        self
    }

    pub fn blockwise(mut self, blockwise: Arc<dyn BlockwiseTransfer>) -> Self {
        self.collaborators.blockwise = Some(blockwise);
        self
    }

    pub fn security(mut self, security: Arc<dyn SecureSessionHandler>) -> Self {
        self.security = Some(security);
        self
    }

    /// Starts the pipeline, then builds and registers every adapter. Any
    /// failure tears down what was already started.
    pub fn build(self) -> CaResult<ConnectivityContext> {
        let ContextBuilder {
            config,
            factories,
            collaborators,
            security,
        } = self;

        let monitors = Arc::new(NetworkMonitors::new());
        let registry = Arc::new(AdapterRegistry::new(config.send_policy));
        let events = Arc::new(RegistryEvents::new(monitors.clone()));
        let pipeline = MessagePipeline::new(registry.clone(), &config, collaborators);
        events.set_sink(pipeline.sink());
        pipeline.start()?;

        let adapter_context = AdapterContext {
            listener: events.clone(),
            security,
            config: config.clone(),
        };

        let context = ConnectivityContext {
            config,
            registry,
            pipeline,
            monitors,
            _events: events,
        };

        let all_factories = transport::builtin_factories(context.config.transports)
            .into_iter()
            .chain(factories);
        for factory in all_factories {
            let registered = factory.build(&adapter_context).and_then(|adapter| {
                context.registry.register(adapter.clone()).map_err(|error| {
                    adapter.terminate();
                    CaError::from(error)
                })
            });
            if let Err(error) = registered {
                warn!("Connectivity initialization failed: {}", error);
                context.terminate();
                return Err(error);
            }
        }

        info!(
            "Connectivity initialized with transports {:?}",
            context.registry.registered()
        );
        Ok(context)
    }
}

/// Everything the connectivity core owns between `initialize()` and `terminate()`
pub struct ConnectivityContext {
    config: ConnectivityConfig,
    registry: Arc<AdapterRegistry>,
    pipeline: MessagePipeline,
    monitors: Arc<NetworkMonitors>,
    _events: Arc<RegistryEvents>,
}

impl ConnectivityContext {
    pub fn builder(config: ConnectivityConfig) -> ContextBuilder {
        ContextBuilder::new(config)
    }

    pub fn config(&self) -> &ConnectivityConfig {
        &self.config
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &MessagePipeline {
        &self.pipeline
    }

    /// Adds every transport in `mask` to the selection and starts its adapter.
    /// Fails without selecting anything if one of them is not available.
    pub fn select_network(&self, mask: TransportAdapter) -> CaResult<()> {
        if mask.is_empty() {
            return Err(CaError::InvalidParam {
                reason: "empty transport mask",
            });
        }
        if let Some(missing) = mask.each().find(|t| !self.registry.is_registered(*t)) {
            warn!("Cannot select {:?}: transport not available", missing);
            return Err(CaError::NotSupported);
        }

        for transport in mask.each() {
            if !self.registry.selection().add(transport) {
                continue;
            }
            if let Err(error) = self.registry.start(transport) {
                warn!("Failed to start {:?}: {}", transport, error);
                self.registry.selection().remove(transport);
                return Err(error);
            }
        }
        Ok(())
    }

    /// Removes every transport in `mask` from the selection and stops its adapter.
    pub fn unselect_network(&self, mask: TransportAdapter) -> CaResult<()> {
        let mut removed = false;
        for transport in mask.each() {
            if self.registry.selection().remove(transport) {
                removed = true;
                if let Err(error) = self.registry.stop(transport) {
                    warn!("Failed to stop {:?}: {}", transport, error);
                }
            }
        }
        if removed {
            Ok(())
        } else {
            Err(CaError::failed(format!("{:?} is not selected", mask)))
        }
    }

    pub fn start_listening_server(&self) -> CaResult<()> {
        self.registry.start_listening()
    }

    pub fn stop_listening_server(&self) -> CaResult<()> {
        self.registry.stop_listening()
    }

    pub fn start_discovery_server(&self) -> CaResult<()> {
        self.registry.start_discovery()
    }

    pub fn register_handlers(
        &self,
        request: Option<RequestCallback>,
        response: Option<ResponseCallback>,
        error: Option<ErrorCallback>,
    ) {
        self.pipeline.handlers().register(request, response, error);
    }

    pub fn register_network_monitor(
        &self,
        adapter_state: Option<AdapterStateCallback>,
        connection_state: Option<ConnectionStateCallback>,
    ) -> MonitorId {
        self.monitors.register(adapter_state, connection_state)
    }

    pub fn unregister_network_monitor(&self, id: MonitorId) -> bool {
        self.monitors.unregister(id)
    }

    /// Multicast when the endpoint carries the multicast flag, unicast otherwise.
    pub fn send_request(&self, endpoint: &Endpoint, request: &RequestInfo) -> CaResult<SendHandle> {
        let kind = if endpoint.is_multicast() {
            SendKind::Multicast
        } else {
            SendKind::Unicast
        };
        let message = AddressedEnvelope::new(
            endpoint.clone(),
            kind,
            Envelope::Request(request.clone()),
        );
        self.pipeline.submit(&message)
    }

    pub fn send_response(&self, endpoint: &Endpoint, response: &ResponseInfo) -> CaResult<SendHandle> {
        let kind = if endpoint.is_multicast() {
            SendKind::Multicast
        } else {
            SendKind::Unicast
        };
        let message = AddressedEnvelope::new(
            endpoint.clone(),
            kind,
            Envelope::Response(response.clone()),
        );
        self.pipeline.submit(&message)
    }

    pub fn send(&self, message: &AddressedEnvelope) -> CaResult<SendHandle> {
        self.pipeline.submit(message)
    }

    pub fn send_network_command(&self, endpoint: &Endpoint, command: NetworkCommand) -> CaResult<()> {
        let message = AddressedEnvelope::network_command(endpoint.clone(), command);
        self.pipeline.submit(&message)?.wait()
    }

    pub fn network_info(&self) -> CaResult<Vec<Endpoint>> {
        self.registry.network_info()
    }

    /// Reads pending data from the selected adapters and delivers every queued
    /// message on the calling thread. Does nothing when a receive worker runs.
    pub fn handle_request_response(&self) -> CaResult<usize> {
        if self.config.dispatch == DispatchMode::Threaded {
            return Ok(0);
        }
        if let Err(error) = self.registry.read_data() {
            debug!("Synchronous read found nothing: {}", error);
        }
        Ok(self.pipeline.dispatch_pending())
    }

    pub fn generate_token(&self, length: usize) -> CaResult<Token> {
        Token::generate(length)
    }

    /// Stops the selected adapters, the pipeline workers and collaborators,
    /// then terminates and forgets every adapter.
    pub fn terminate(&self) {
        self.registry.stop_selected();
        self.pipeline.stop();
        self.registry.terminate();
        info!("Connectivity terminated");
    }
}
