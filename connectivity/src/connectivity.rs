use std::sync::{Arc, RwLock};

use log::info;

use ca_shared::{
    AddressedEnvelope, CaError, CaResult, Endpoint, NetworkCommand, RequestInfo, ResponseInfo,
    Token, TransportAdapter,
};

use crate::{
    config::ConnectivityConfig,
    context::{ConnectivityContext, ContextBuilder},
    handlers::{ErrorCallback, RequestCallback, ResponseCallback},
    monitor::{AdapterStateCallback, ConnectionStateCallback, MonitorId},
    pipeline::SendHandle,
};

/// Application facing entry point. Holds a [`ConnectivityContext`] between
/// `initialize()` and `terminate()`; every operation outside that window
/// fails with [`CaError::NotInitialized`].
#[derive(Default)]
pub struct Connectivity {
    context: RwLock<Option<Arc<ConnectivityContext>>>,
}

impl Connectivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes with the built-in transports named in `config`
    pub fn initialize(&self, config: ConnectivityConfig) -> CaResult<()> {
        self.initialize_with(ContextBuilder::new(config))
    }

    /// A second call while initialized leaves the running context alone.
    pub fn initialize_with(&self, builder: ContextBuilder) -> CaResult<()> {
        let mut guard = self
            .context
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_some() {
            info!("Connectivity already initialized");
            return Ok(());
        }
        *guard = Some(Arc::new(builder.build()?));
        Ok(())
    }

    pub fn terminate(&self) {
        let context = self
            .context
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(context) = context {
            context.terminate();
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.context
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// The live context, for callers that need more than this surface offers
    pub fn context(&self) -> CaResult<Arc<ConnectivityContext>> {
        self.context
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(CaError::NotInitialized)
    }

    pub fn select_network(&self, mask: TransportAdapter) -> CaResult<()> {
        self.context()?.select_network(mask)
    }

    pub fn unselect_network(&self, mask: TransportAdapter) -> CaResult<()> {
        self.context()?.unselect_network(mask)
    }

    pub fn start_listening_server(&self) -> CaResult<()> {
        self.context()?.start_listening_server()
    }

    pub fn stop_listening_server(&self) -> CaResult<()> {
        self.context()?.stop_listening_server()
    }

    pub fn start_discovery_server(&self) -> CaResult<()> {
        self.context()?.start_discovery_server()
    }

    pub fn register_handlers(
        &self,
        request: Option<RequestCallback>,
        response: Option<ResponseCallback>,
        error: Option<ErrorCallback>,
    ) -> CaResult<()> {
        self.context()?.register_handlers(request, response, error);
        Ok(())
    }

    pub fn register_network_monitor(
        &self,
        adapter_state: Option<AdapterStateCallback>,
        connection_state: Option<ConnectionStateCallback>,
    ) -> CaResult<MonitorId> {
        Ok(self
            .context()?
            .register_network_monitor(adapter_state, connection_state))
    }

    pub fn unregister_network_monitor(&self, id: MonitorId) -> CaResult<bool> {
        Ok(self.context()?.unregister_network_monitor(id))
    }

    pub fn send_request(&self, endpoint: &Endpoint, request: &RequestInfo) -> CaResult<SendHandle> {
        self.context()?.send_request(endpoint, request)
    }

    pub fn send_response(&self, endpoint: &Endpoint, response: &ResponseInfo) -> CaResult<SendHandle> {
        self.context()?.send_response(endpoint, response)
    }

    pub fn send(&self, message: &AddressedEnvelope) -> CaResult<SendHandle> {
        self.context()?.send(message)
    }

    pub fn send_network_command(&self, endpoint: &Endpoint, command: NetworkCommand) -> CaResult<()> {
        self.context()?.send_network_command(endpoint, command)
    }

    pub fn network_info(&self) -> CaResult<Vec<Endpoint>> {
        self.context()?.network_info()
    }

    pub fn handle_request_response(&self) -> CaResult<usize> {
        self.context()?.handle_request_response()
    }

    pub fn generate_token(&self, length: usize) -> CaResult<Token> {
        self.context()?.generate_token(length)
    }

    /// Tokens release their storage on drop; this only enforces the gate.
    pub fn destroy_token(&self, token: Token) -> CaResult<()> {
        self.context()?;
        drop(token);
        Ok(())
    }
}
