//! Length header of CoAP over reliable transports.
//!
//! The first byte holds a Len nibble (high) and the token length (low). Len
//! values 0 to 12 are literal, 13/14/15 select a 1, 2 or 4 byte big-endian
//! extension that is added to 13, 269 or 65805 respectively. The code byte
//! and token follow, then options and payload whose size is the decoded Len.

use crate::coap::PduError;

pub const LEN_EXT_8: u8 = 13;
pub const LEN_EXT_16: u8 = 14;
pub const LEN_EXT_32: u8 = 15;

const EXT_8_BASE: u64 = 13;
const EXT_16_BASE: u64 = 269;
const EXT_32_BASE: u64 = 65805;

/// Largest body length the 4-byte extension can describe
pub const MAX_STREAM_LENGTH: u64 = EXT_32_BASE + u32::MAX as u64;

/// Number of extended length bytes selected by a Len nibble.
pub fn extended_length_size(nibble: u8) -> usize {
    match nibble & 0x0F {
        LEN_EXT_8 => 1,
        LEN_EXT_16 => 2,
        LEN_EXT_32 => 4,
        _ => 0,
    }
}

/// Encodes a body length into its Len nibble and extension bytes.
pub fn encode_length(length: usize) -> Result<(u8, Vec<u8>), PduError> {
    let value = length as u64;
    if value < EXT_8_BASE {
        Ok((value as u8, Vec::new()))
    } else if value < EXT_16_BASE {
        Ok((LEN_EXT_8, vec![(value - EXT_8_BASE) as u8]))
    } else if value < EXT_32_BASE {
        Ok((LEN_EXT_16, ((value - EXT_16_BASE) as u16).to_be_bytes().to_vec()))
    } else if value <= MAX_STREAM_LENGTH {
        Ok((LEN_EXT_32, ((value - EXT_32_BASE) as u32).to_be_bytes().to_vec()))
    } else {
        Err(PduError::MessageTooLarge { length })
    }
}

/// Decodes the body length from a buffer starting at the first header byte.
/// Returns `None` until the extension bytes are available.
pub fn decode_length(header: &[u8]) -> Option<usize> {
    let first = *header.first()?;
    let nibble = first >> 4;
    let ext = header.get(1..1 + extended_length_size(nibble))?;
    let value = match nibble {
        LEN_EXT_8 => ext[0] as u64 + EXT_8_BASE,
        LEN_EXT_16 => u16::from_be_bytes([ext[0], ext[1]]) as u64 + EXT_16_BASE,
        LEN_EXT_32 => u32::from_be_bytes([ext[0], ext[1], ext[2], ext[3]]) as u64 + EXT_32_BASE,
        literal => literal as u64,
    };
    usize::try_from(value).ok()
}

/// Size of the header (length byte, extension, code byte, token) as implied
/// by the first byte alone.
pub fn header_length(first_byte: u8) -> usize {
    1 + extended_length_size(first_byte >> 4) + 1 + (first_byte & 0x0F) as usize
}

/// Total message size, available once the length extension has been read.
pub fn total_length(header: &[u8]) -> Option<usize> {
    let body = decode_length(header)?;
    header_length(header[0]).checked_add(body)
}
