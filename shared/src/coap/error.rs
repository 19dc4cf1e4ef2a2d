use thiserror::Error;

/// Errors raised while encoding or parsing a CoAP PDU
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PduError {
    /// Fewer bytes than the fixed header requires
    #[error("PDU too short: need at least {needed} bytes, have {have}")]
    TooShort { needed: usize, have: usize },

    /// UDP header carried a version other than 1
    #[error("Unsupported CoAP version {version}")]
    InvalidVersion { version: u8 },

    /// Token length nibble outside 0..=8
    #[error("Invalid token length {length}. Tokens are at most 8 bytes")]
    InvalidTokenLength { length: usize },

    /// An option header or value runs past the end of the PDU
    #[error("Option at byte offset {offset} is truncated")]
    TruncatedOption { offset: usize },

    /// Nibble value 15 in an option delta or length (reserved for the payload marker)
    #[error("Reserved option nibble at byte offset {offset}")]
    ReservedOptionNibble { offset: usize },

    /// Accumulated option number exceeds 65535
    #[error("Option number overflow at byte offset {offset}")]
    OptionNumberOverflow { offset: usize },

    /// Option value too long to be expressed with the extended length field
    #[error("Option {number} value of {length} bytes is too long to encode")]
    OptionTooLarge { number: u16, length: usize },

    /// Payload marker present but not followed by any payload byte
    #[error("Payload marker present without a payload")]
    EmptyPayloadAfterMarker,

    /// Stream header length does not match the bytes provided
    #[error("Stream header declares {declared} bytes of options and payload, found {found}")]
    LengthMismatch { declared: usize, found: usize },

    /// Envelope kind that never goes on the wire
    #[error("{kind} envelopes have no wire representation")]
    NotEncodable { kind: &'static str },

    /// Body longer than the stream header can describe
    #[error("Message body of {length} bytes exceeds the largest encodable stream length")]
    MessageTooLarge { length: usize },
}
