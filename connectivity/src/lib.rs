//! # CA Connectivity
//! Transport-independent CoAP messaging: adapters register with a registry,
//! outbound envelopes flow through a send worker to every selected
//! transport, and inbound bytes are parsed, deduplicated and delivered to
//! the registered request/response/error callbacks.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

#[macro_use]
extern crate cfg_if;

pub mod transport;

mod adapter;
mod collaborators;
mod config;
mod connectivity;
mod context;
mod handlers;
mod monitor;
mod network_selection;
mod pipeline;
mod registry;

pub use adapter::{
    Adapter, AdapterContext, AdapterFactory, AdapterListener, AdapterRecord, AdapterRecordBuilder,
    RegistrationError,
};
pub use collaborators::{
    BlockwiseTransfer, Decrypted, ResendFn, Retransmission, RetransmissionHooks,
    SecureSessionHandler, TimeoutFn,
};
pub use config::{ConnectivityConfig, DispatchMode, SendPolicy, TcpConfig, UdpConfig};
pub use connectivity::Connectivity;
pub use context::{ConnectivityContext, ContextBuilder};
pub use handlers::{ErrorCallback, MessageHandlers, RequestCallback, ResponseCallback};
pub use monitor::{AdapterStateCallback, ConnectionStateCallback, MonitorId, NetworkMonitors};
pub use network_selection::NetworkSelection;
pub use pipeline::{Collaborators, MessagePipeline, PipelineHandle, SendHandle};
pub use registry::{AdapterRegistry, PacketSink, RegistryEvents};

pub mod shared {
    pub use ca_shared::{
        AddressedEnvelope, CaError, CaResult, Code, CoapOption, DataKind, Endpoint, Envelope,
        ErrorInfo, MessageInfo, MessageType, Method, NetworkCommand, RemoteIdentity, RequestInfo,
        ResponseInfo, SecureEndpoint, SendKind, Token, TransportAdapter, TransportFlags,
    };
}
