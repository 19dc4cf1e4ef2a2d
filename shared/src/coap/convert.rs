use crate::{
    coap::{Pdu, PduError},
    endpoint::RemoteIdentity,
    messages::{
        envelope::Envelope,
        info::{option_number, CoapOption, Code, MessageInfo, Method, RequestInfo, ResponseInfo},
    },
};

impl Pdu {
    /// Builds the wire message for an outbound request or response.
    pub fn from_envelope(envelope: &Envelope) -> Result<Pdu, PduError> {
        match envelope {
            Envelope::Request(request) => Ok(Pdu::from_info(request.method.code(), &request.info)),
            Envelope::Response(response) => Ok(Pdu::from_info(response.result, &response.info)),
            Envelope::Error(_) => Err(PduError::NotEncodable { kind: "Error" }),
            Envelope::NetworkCommand(_) => Err(PduError::NotEncodable {
                kind: "NetworkCommand",
            }),
        }
    }

    pub fn from_info(code: Code, info: &MessageInfo) -> Pdu {
        let mut options = info.options.clone();
        if let Some(uri) = &info.resource_uri {
            let (segments, queries) = split_resource_uri(uri);
            options.extend(
                segments
                    .into_iter()
                    .map(|segment| CoapOption::new(option_number::URI_PATH, segment.as_bytes().to_vec())),
            );
            options.extend(
                queries
                    .into_iter()
                    .map(|query| CoapOption::new(option_number::URI_QUERY, query.as_bytes().to_vec())),
            );
        }
        if let Some(format) = info.payload_format {
            options.push(CoapOption::uint(option_number::CONTENT_FORMAT, format as u32));
        }
        if let Some(format) = info.accept_format {
            options.push(CoapOption::uint(option_number::ACCEPT, format as u32));
        }

        Pdu {
            msg_type: info.msg_type,
            code,
            message_id: info.message_id,
            token: info.token.clone(),
            options,
            payload: info.payload.clone(),
        }
    }

    /// Splits the PDU back into its code and message fields, lifting the
    /// resource URI and format options out of the generic option list.
    pub fn into_info(self, identity: Option<RemoteIdentity>) -> (Code, MessageInfo) {
        let mut segments = Vec::new();
        let mut queries = Vec::new();
        let mut payload_format = None;
        let mut accept_format = None;
        let mut options = Vec::new();

        for option in self.options {
            match option.number {
                option_number::URI_PATH => segments.push(String::from_utf8_lossy(&option.value).into_owned()),
                option_number::URI_QUERY => queries.push(String::from_utf8_lossy(&option.value).into_owned()),
                option_number::CONTENT_FORMAT => payload_format = format_value(&option),
                option_number::ACCEPT => accept_format = format_value(&option),
                _ => options.push(option),
            }
        }

        let resource_uri = if segments.is_empty() && queries.is_empty() {
            None
        } else {
            let mut uri = format!("/{}", segments.join("/"));
            if !queries.is_empty() {
                uri.push('?');
                uri.push_str(&queries.join("&"));
            }
            Some(uri)
        };

        let info = MessageInfo {
            msg_type: self.msg_type,
            message_id: self.message_id,
            token: self.token,
            options,
            payload: self.payload,
            payload_format,
            accept_format,
            resource_uri,
            identity,
        };
        (self.code, info)
    }

    /// Method codes become requests, every other code becomes a response.
    pub fn into_envelope(self, identity: Option<RemoteIdentity>) -> Envelope {
        let (code, info) = self.into_info(identity);
        match Method::from_code(code) {
            Some(method) => Envelope::Request(RequestInfo::new(method, info)),
            None => Envelope::Response(ResponseInfo::new(code, info)),
        }
    }
}

/// Content formats are 16-bit; a wider value is not a format.
fn format_value(option: &CoapOption) -> Option<u16> {
    option.as_uint().and_then(|value| u16::try_from(value).ok())
}

/// Splits `coap://host:port/a/b?x=1&y=2` (scheme and authority optional) into
/// path segments and query parameters.
fn split_resource_uri(uri: &str) -> (Vec<&str>, Vec<&str>) {
    let without_scheme = match uri.find("://") {
        Some(index) => {
            let rest = &uri[index + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => "",
            }
        }
        None => uri,
    };
    let (path, query) = match without_scheme.split_once('?') {
        Some((path, query)) => (path, query),
        None => (without_scheme, ""),
    };
    let segments = path.split('/').filter(|s| !s.is_empty()).collect();
    let queries = query.split('&').filter(|s| !s.is_empty()).collect();
    (segments, queries)
}
