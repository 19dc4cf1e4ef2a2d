use crate::{
    coap::{tcp_header, PduError},
    messages::info::{option_number, CoapOption, Code, MessageType},
    token::{Token, MAX_TOKEN_LEN},
    types::{MessageId, TransportAdapter},
};

const COAP_VERSION: u8 = 1;
const UDP_HEADER_SIZE: usize = 4;
const PAYLOAD_MARKER: u8 = 0xFF;

const OPT_EXT_8: u8 = 13;
const OPT_EXT_16: u8 = 14;
const OPT_RESERVED: u8 = 15;
const OPT_EXT_8_BASE: usize = 13;
const OPT_EXT_16_BASE: usize = 269;
const OPT_MAX_VALUE: usize = OPT_EXT_16_BASE + u16::MAX as usize;

/// Which header layout a PDU uses on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderForm {
    /// Version, type, token length, code and message id
    Udp,
    /// Variable length header without type or message id
    Tcp,
}

impl HeaderForm {
    pub fn for_transport(adapter: TransportAdapter) -> Self {
        if adapter.is_coap_over_tcp() {
            HeaderForm::Tcp
        } else {
            HeaderForm::Udp
        }
    }
}

/// A parsed CoAP message
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pdu {
    pub msg_type: MessageType,
    pub code: Code,
    pub message_id: MessageId,
    pub token: Token,
    pub options: Vec<CoapOption>,
    pub payload: Vec<u8>,
}

impl Pdu {
    pub fn option(&self, number: u16) -> Option<&CoapOption> {
        self.options.iter().find(|option| option.number == number)
    }

    pub fn has_block_option(&self) -> bool {
        self.option(option_number::BLOCK1).is_some() || self.option(option_number::BLOCK2).is_some()
    }

    pub fn encode(&self, form: HeaderForm) -> Result<Vec<u8>, PduError> {
        let mut body = Vec::with_capacity(self.payload.len() + 16);
        encode_options(&self.options, &mut body)?;
        if !self.payload.is_empty() {
            body.push(PAYLOAD_MARKER);
            body.extend_from_slice(&self.payload);
        }

        let tkl = self.token.len() as u8;
        let mut out = Vec::with_capacity(body.len() + 8 + self.token.len());
        match form {
            HeaderForm::Udp => {
                out.push((COAP_VERSION << 6) | (self.msg_type.to_bits() << 4) | tkl);
                out.push(self.code.0);
                out.extend_from_slice(&self.message_id.to_be_bytes());
            }
            HeaderForm::Tcp => {
                let (nibble, extension) = tcp_header::encode_length(body.len())?;
                out.push((nibble << 4) | tkl);
                out.extend_from_slice(&extension);
                out.push(self.code.0);
            }
        }
        out.extend_from_slice(self.token.as_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decode(bytes: &[u8], form: HeaderForm) -> Result<Pdu, PduError> {
        match form {
            HeaderForm::Udp => decode_udp(bytes),
            HeaderForm::Tcp => decode_tcp(bytes),
        }
    }
}

fn decode_udp(bytes: &[u8]) -> Result<Pdu, PduError> {
    if bytes.len() < UDP_HEADER_SIZE {
        return Err(PduError::TooShort {
            needed: UDP_HEADER_SIZE,
            have: bytes.len(),
        });
    }
    let version = bytes[0] >> 6;
    if version != COAP_VERSION {
        return Err(PduError::InvalidVersion { version });
    }
    let msg_type = MessageType::from_bits(bytes[0] >> 4);
    let tkl = (bytes[0] & 0x0F) as usize;
    let code = Code(bytes[1]);
    let message_id = u16::from_be_bytes([bytes[2], bytes[3]]);
    let (token, rest_offset) = read_token(bytes, UDP_HEADER_SIZE, tkl)?;
    let (options, payload) = decode_options(bytes, rest_offset)?;
    Ok(Pdu {
        msg_type,
        code,
        message_id,
        token,
        options,
        payload,
    })
}

fn decode_tcp(bytes: &[u8]) -> Result<Pdu, PduError> {
    let Some(&first) = bytes.first() else {
        return Err(PduError::TooShort { needed: 2, have: 0 });
    };
    let header_length = tcp_header::header_length(first);
    if bytes.len() < header_length {
        return Err(PduError::TooShort {
            needed: header_length,
            have: bytes.len(),
        });
    }
    let declared = tcp_header::decode_length(bytes).ok_or(PduError::TooShort {
        needed: header_length,
        have: bytes.len(),
    })?;
    let found = bytes.len() - header_length;
    if declared != found {
        return Err(PduError::LengthMismatch { declared, found });
    }
    let tkl = (first & 0x0F) as usize;
    let code_offset = 1 + tcp_header::extended_length_size(first >> 4);
    let code = Code(bytes[code_offset]);
    let (token, rest_offset) = read_token(bytes, code_offset + 1, tkl)?;
    let (options, payload) = decode_options(bytes, rest_offset)?;
    Ok(Pdu {
        msg_type: MessageType::NonConfirmable,
        code,
        message_id: 0,
        token,
        options,
        payload,
    })
}

fn read_token(bytes: &[u8], offset: usize, tkl: usize) -> Result<(Token, usize), PduError> {
    if tkl > MAX_TOKEN_LEN {
        return Err(PduError::InvalidTokenLength { length: tkl });
    }
    let end = offset + tkl;
    let slice = bytes.get(offset..end).ok_or(PduError::TooShort {
        needed: end,
        have: bytes.len(),
    })?;
    let token = Token::new(slice).map_err(|_| PduError::InvalidTokenLength { length: tkl })?;
    Ok((token, end))
}

fn encode_options(options: &[CoapOption], out: &mut Vec<u8>) -> Result<(), PduError> {
    // stable sort keeps repeated options in insertion order
    let mut sorted: Vec<&CoapOption> = options.iter().collect();
    sorted.sort_by_key(|option| option.number);

    let mut previous = 0u16;
    for option in sorted {
        if option.value.len() > OPT_MAX_VALUE {
            return Err(PduError::OptionTooLarge {
                number: option.number,
                length: option.value.len(),
            });
        }
        let delta = (option.number - previous) as usize;
        previous = option.number;

        let (delta_nibble, delta_ext) = option_nibble(delta);
        let (length_nibble, length_ext) = option_nibble(option.value.len());
        out.push((delta_nibble << 4) | length_nibble);
        out.extend_from_slice(&delta_ext);
        out.extend_from_slice(&length_ext);
        out.extend_from_slice(&option.value);
    }
    Ok(())
}

fn option_nibble(value: usize) -> (u8, Vec<u8>) {
    if value < OPT_EXT_8_BASE {
        (value as u8, Vec::new())
    } else if value < OPT_EXT_16_BASE {
        (OPT_EXT_8, vec![(value - OPT_EXT_8_BASE) as u8])
    } else {
        (
            OPT_EXT_16,
            ((value - OPT_EXT_16_BASE) as u16).to_be_bytes().to_vec(),
        )
    }
}

fn read_option_value(bytes: &[u8], cursor: &mut usize, nibble: u8, start: usize) -> Result<usize, PduError> {
    match nibble {
        OPT_EXT_8 => {
            let byte = *bytes
                .get(*cursor)
                .ok_or(PduError::TruncatedOption { offset: start })?;
            *cursor += 1;
            Ok(byte as usize + OPT_EXT_8_BASE)
        }
        OPT_EXT_16 => {
            let pair = bytes
                .get(*cursor..*cursor + 2)
                .ok_or(PduError::TruncatedOption { offset: start })?;
            *cursor += 2;
            Ok(u16::from_be_bytes([pair[0], pair[1]]) as usize + OPT_EXT_16_BASE)
        }
        OPT_RESERVED => Err(PduError::ReservedOptionNibble { offset: start }),
        literal => Ok(literal as usize),
    }
}

fn decode_options(bytes: &[u8], mut cursor: usize) -> Result<(Vec<CoapOption>, Vec<u8>), PduError> {
    let mut options = Vec::new();
    let mut number = 0u16;

    while cursor < bytes.len() {
        let start = cursor;
        let header = bytes[cursor];
        if header == PAYLOAD_MARKER {
            let payload = &bytes[cursor + 1..];
            if payload.is_empty() {
                return Err(PduError::EmptyPayloadAfterMarker);
            }
            return Ok((options, payload.to_vec()));
        }
        cursor += 1;

        let delta = read_option_value(bytes, &mut cursor, header >> 4, start)?;
        let length = read_option_value(bytes, &mut cursor, header & 0x0F, start)?;

        number = u16::try_from(number as usize + delta)
            .map_err(|_| PduError::OptionNumberOverflow { offset: start })?;
        let value = bytes
            .get(cursor..cursor + length)
            .ok_or(PduError::TruncatedOption { offset: start })?;
        cursor += length;
        options.push(CoapOption::new(number, value.to_vec()));
    }

    Ok((options, Vec::new()))
}
