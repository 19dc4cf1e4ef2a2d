use bitflags::bitflags;

pub type MessageId = u16;

bitflags! {
    /// Transport kinds an adapter can serve. An endpoint names one of them,
    /// a selection or a registry query may name several.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TransportAdapter: u32 {
        const IP = 1 << 0;
        const GATT_BTLE = 1 << 1;
        const RFCOMM_BTEDR = 1 << 2;
        const REMOTE_ACCESS = 1 << 3;
        const TCP = 1 << 4;
        const NFC = 1 << 5;
    }
}

impl TransportAdapter {
    /// True for transports that carry CoAP with the RFC 8323 stream header.
    pub fn is_coap_over_tcp(self) -> bool {
        self == TransportAdapter::TCP
    }

    pub fn supports_blockwise(self) -> bool {
        self.intersects(TransportAdapter::IP | TransportAdapter::GATT_BTLE | TransportAdapter::TCP)
    }

    /// Resolves the "unspecified" transport to the given fallback set.
    pub fn or_all(self, fallback: TransportAdapter) -> TransportAdapter {
        if self.is_empty() {
            fallback
        } else {
            self
        }
    }

    /// Iterates each single transport contained in the mask.
    pub fn each(self) -> impl Iterator<Item = TransportAdapter> {
        self.iter()
    }
}

bitflags! {
    /// Address family, security and delivery flags carried by an endpoint.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TransportFlags: u16 {
        const SECURE = 1 << 4;
        const IPV6 = 1 << 5;
        const IPV4 = 1 << 6;
        const MULTICAST = 1 << 7;

        const IP_FAMILY_MASK = Self::IPV6.bits() | Self::IPV4.bits();
    }
}

impl TransportFlags {
    pub fn family(self) -> TransportFlags {
        self & TransportFlags::IP_FAMILY_MASK
    }
}

/// What kind of message a block of bytes handed to an adapter carries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataKind {
    Request,
    Response,
    Error,
    NetworkCommand,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SendKind {
    #[default]
    Unicast,
    Multicast,
}
