//! # CA Shared
//! Endpoint and envelope types, the CoAP codec, stream reassembly and the
//! worker primitives shared by the connectivity core and its transports.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod connection;
mod endpoint;
mod error;
mod history;
mod messages;
mod token;
mod types;
mod worker_queue;

pub mod coap;

pub use connection::{
    CoapStreamHeader, FrameHeader, FramingError, Reassembler, StreamFramer, TlsRecordBuffer,
    TlsRecordHeader, TLS_HEADER_SIZE,
};
pub use endpoint::{Endpoint, RemoteIdentity, SecureEndpoint, COAP_PORT, COAP_SECURE_PORT};
pub use error::{CaError, CaResult};
pub use history::{DuplicateHistory, HISTORY_SIZE};
pub use messages::{
    envelope::{AddressedEnvelope, Envelope},
    info::{
        option_number, CoapOption, Code, ErrorInfo, MessageInfo, MessageType, Method,
        NetworkCommand, RequestInfo, ResponseInfo,
    },
};
pub use token::{Token, MAX_TOKEN_LEN};
pub use types::{DataKind, MessageId, SendKind, TransportAdapter, TransportFlags};
pub use worker_queue::{QueueError, WorkerQueue};
