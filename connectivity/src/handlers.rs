use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, trace};

use ca_shared::{AddressedEnvelope, Endpoint, Envelope, ErrorInfo, RequestInfo, ResponseInfo};

pub type RequestCallback = Arc<dyn Fn(&Endpoint, &RequestInfo) + Send + Sync>;
pub type ResponseCallback = Arc<dyn Fn(&Endpoint, &ResponseInfo) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&Endpoint, &ErrorInfo) + Send + Sync>;

#[derive(Clone, Default)]
struct Callbacks {
    request: Option<RequestCallback>,
    response: Option<ResponseCallback>,
    error: Option<ErrorCallback>,
}

/// Application callbacks that receive delivered messages
#[derive(Default)]
pub struct MessageHandlers {
    callbacks: RwLock<Callbacks>,
}

impl MessageHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        request: Option<RequestCallback>,
        response: Option<ResponseCallback>,
        error: Option<ErrorCallback>,
    ) {
        *self.callbacks.write().unwrap_or_else(PoisonError::into_inner) = Callbacks {
            request,
            response,
            error,
        };
    }

    /// Hands the message to exactly one callback, chosen by envelope kind.
    pub fn dispatch(&self, message: &AddressedEnvelope) {
        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let endpoint = &message.endpoint;

        match &message.envelope {
            Envelope::Request(request) => match &callbacks.request {
                Some(callback) => callback(endpoint, request),
                None => debug!("No request handler registered, dropping request from {}", endpoint),
            },
            Envelope::Response(response) => match &callbacks.response {
                Some(callback) => callback(endpoint, response),
                None => debug!("No response handler registered, dropping response from {}", endpoint),
            },
            Envelope::Error(error) => match &callbacks.error {
                Some(callback) => callback(endpoint, error),
                None => debug!("No error handler registered, dropping error for {}", endpoint),
            },
            Envelope::NetworkCommand(command) => {
                trace!("Ignoring {:?} on the receive path", command)
            }
        }
    }
}
