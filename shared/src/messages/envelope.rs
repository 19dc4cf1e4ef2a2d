use crate::{
    endpoint::Endpoint,
    messages::info::{ErrorInfo, MessageInfo, NetworkCommand, RequestInfo, ResponseInfo},
    types::{DataKind, SendKind},
};

/// Protocol-neutral container for everything that crosses the message pipeline
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Envelope {
    Request(RequestInfo),
    Response(ResponseInfo),
    Error(ErrorInfo),
    NetworkCommand(NetworkCommand),
}

impl Envelope {
    pub fn data_kind(&self) -> DataKind {
        match self {
            Envelope::Request(_) => DataKind::Request,
            Envelope::Response(_) => DataKind::Response,
            Envelope::Error(_) => DataKind::Error,
            Envelope::NetworkCommand(_) => DataKind::NetworkCommand,
        }
    }

    pub fn info(&self) -> Option<&MessageInfo> {
        match self {
            Envelope::Request(request) => Some(&request.info),
            Envelope::Response(response) => Some(&response.info),
            Envelope::Error(error) => Some(&error.info),
            Envelope::NetworkCommand(_) => None,
        }
    }
}

/// An envelope bound to the endpoint it is sent to or was received from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressedEnvelope {
    pub endpoint: Endpoint,
    pub send_kind: SendKind,
    pub envelope: Envelope,
}

impl AddressedEnvelope {
    pub fn new(endpoint: Endpoint, send_kind: SendKind, envelope: Envelope) -> Self {
        Self {
            endpoint,
            send_kind,
            envelope,
        }
    }

    pub fn request(endpoint: Endpoint, request: RequestInfo) -> Self {
        Self::new(endpoint, SendKind::Unicast, Envelope::Request(request))
    }

    pub fn multicast_request(endpoint: Endpoint, request: RequestInfo) -> Self {
        Self::new(endpoint, SendKind::Multicast, Envelope::Request(request))
    }

    pub fn response(endpoint: Endpoint, response: ResponseInfo) -> Self {
        Self::new(endpoint, SendKind::Unicast, Envelope::Response(response))
    }

    pub fn network_command(endpoint: Endpoint, command: NetworkCommand) -> Self {
        Self::new(endpoint, SendKind::Unicast, Envelope::NetworkCommand(command))
    }

    pub fn is_multicast(&self) -> bool {
        self.send_kind == SendKind::Multicast
    }
}
