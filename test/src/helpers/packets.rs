use ca_shared::{
    coap::{HeaderForm, Pdu},
    Code, MessageInfo, MessageType, Method, RequestInfo, Token,
};

/// A confirmable request with the given id and token, in UDP header form
pub fn request_datagram(message_id: u16, token: &[u8], method: Method) -> Vec<u8> {
    let pdu = Pdu {
        msg_type: MessageType::Confirmable,
        code: method.code(),
        message_id,
        token: Token::new(token).unwrap(),
        ..Pdu::default()
    };
    pdu.encode(HeaderForm::Udp).unwrap()
}

/// A piggybacked response in UDP header form
pub fn response_datagram(message_id: u16, token: &[u8], code: Code, payload: &[u8]) -> Vec<u8> {
    let pdu = Pdu {
        msg_type: MessageType::Acknowledgement,
        code,
        message_id,
        token: Token::new(token).unwrap(),
        payload: payload.to_vec(),
        ..Pdu::default()
    };
    pdu.encode(HeaderForm::Udp).unwrap()
}

/// A request for `uri` with a fixed token
pub fn request_info(method: Method, uri: &str, token: &[u8]) -> RequestInfo {
    RequestInfo::new(
        method,
        MessageInfo {
            msg_type: MessageType::NonConfirmable,
            token: Token::new(token).unwrap(),
            resource_uri: Some(uri.to_string()),
            ..MessageInfo::default()
        },
    )
}

/// Parses bytes an adapter was asked to send
pub fn decode_sent(data: &[u8], form: HeaderForm) -> Pdu {
    Pdu::decode(data, form).unwrap()
}
