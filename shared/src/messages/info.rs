use std::fmt;

use crate::{endpoint::RemoteIdentity, error::CaError, token::Token, types::MessageId};

/// CoAP message type (only meaningful on the UDP header form)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MessageType {
    Confirmable,
    #[default]
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl MessageType {
    pub fn to_bits(self) -> u8 {
        match self {
            MessageType::Confirmable => 0,
            MessageType::NonConfirmable => 1,
            MessageType::Acknowledgement => 2,
            MessageType::Reset => 3,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }
}

/// A CoAP code byte: 3-bit class, 5-bit detail
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Code(pub u8);

impl Code {
    pub const EMPTY: Code = Code::new(0, 0);

    pub const CREATED: Code = Code::new(2, 1);
    pub const DELETED: Code = Code::new(2, 2);
    pub const VALID: Code = Code::new(2, 3);
    pub const CHANGED: Code = Code::new(2, 4);
    pub const CONTENT: Code = Code::new(2, 5);
    pub const CONTINUE: Code = Code::new(2, 31);
    pub const BAD_REQUEST: Code = Code::new(4, 0);
    pub const UNAUTHORIZED: Code = Code::new(4, 1);
    pub const BAD_OPTION: Code = Code::new(4, 2);
    pub const FORBIDDEN: Code = Code::new(4, 3);
    pub const NOT_FOUND: Code = Code::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 5);
    pub const NOT_ACCEPTABLE: Code = Code::new(4, 6);
    pub const REQUEST_ENTITY_INCOMPLETE: Code = Code::new(4, 8);
    pub const REQUEST_ENTITY_TOO_LARGE: Code = Code::new(4, 13);
    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);
    pub const SERVICE_UNAVAILABLE: Code = Code::new(5, 3);
    /// Reported locally when the retransmission engine gives up on a message
    pub const RETRANSMIT_TIMEOUT: Code = Code::new(5, 4);

    pub const fn new(class: u8, detail: u8) -> Self {
        Code(((class & 0x07) << 5) | (detail & 0x1F))
    }

    pub fn class(self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(self) -> u8 {
        self.0 & 0x1F
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn code(self) -> Code {
        match self {
            Method::Get => Code::new(0, 1),
            Method::Post => Code::new(0, 2),
            Method::Put => Code::new(0, 3),
            Method::Delete => Code::new(0, 4),
        }
    }

    pub fn from_code(code: Code) -> Option<Self> {
        match (code.class(), code.detail()) {
            (0, 1) => Some(Method::Get),
            (0, 2) => Some(Method::Post),
            (0, 3) => Some(Method::Put),
            (0, 4) => Some(Method::Delete),
            _ => None,
        }
    }
}

/// Well-known CoAP option numbers
pub mod option_number {
    pub const IF_MATCH: u16 = 1;
    pub const URI_HOST: u16 = 3;
    pub const ETAG: u16 = 4;
    pub const IF_NONE_MATCH: u16 = 5;
    pub const OBSERVE: u16 = 6;
    pub const URI_PORT: u16 = 7;
    pub const LOCATION_PATH: u16 = 8;
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
    pub const MAX_AGE: u16 = 14;
    pub const URI_QUERY: u16 = 15;
    pub const ACCEPT: u16 = 17;
    pub const LOCATION_QUERY: u16 = 20;
    pub const BLOCK2: u16 = 23;
    pub const BLOCK1: u16 = 27;
    pub const SIZE2: u16 = 28;
    pub const PROXY_URI: u16 = 35;
    pub const SIZE1: u16 = 60;
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CoapOption {
    pub number: u16,
    pub value: Vec<u8>,
}

impl CoapOption {
    pub fn new(number: u16, value: impl Into<Vec<u8>>) -> Self {
        Self {
            number,
            value: value.into(),
        }
    }

    /// Encodes an unsigned option value in the minimal number of bytes.
    pub fn uint(number: u16, value: u32) -> Self {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        Self::new(number, bytes[skip..].to_vec())
    }

    pub fn as_uint(&self) -> Option<u32> {
        if self.value.len() > 4 {
            return None;
        }
        Some(self.value.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
    }
}

/// Fields common to every request and response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageInfo {
    pub msg_type: MessageType,
    pub message_id: MessageId,
    pub token: Token,
    /// Options other than the ones surfaced as dedicated fields below
    pub options: Vec<CoapOption>,
    pub payload: Vec<u8>,
    pub payload_format: Option<u16>,
    pub accept_format: Option<u16>,
    /// Path and query, e.g. `/oic/res?rt=core.light`
    pub resource_uri: Option<String>,
    /// Identity of the secure peer this message came from, if any
    pub identity: Option<RemoteIdentity>,
}

impl MessageInfo {
    pub fn has_option(&self, number: u16) -> bool {
        self.options.iter().any(|option| option.number == number)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: Method,
    pub info: MessageInfo,
}

impl RequestInfo {
    pub fn new(method: Method, info: MessageInfo) -> Self {
        Self { method, info }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseInfo {
    pub result: Code,
    pub info: MessageInfo,
}

impl ResponseInfo {
    pub fn new(result: Code, info: MessageInfo) -> Self {
        Self { result, info }
    }
}

/// A failure reported asynchronously for a message that was already accepted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorInfo {
    pub result: CaError,
    pub info: MessageInfo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkCommand {
    /// Tear down the session bound to the envelope's endpoint
    Disconnect,
}
