use crate::{
    token::{Token, MAX_TOKEN_LEN},
    types::{MessageId, TransportFlags},
};

/// Number of recent requests remembered for dual-stack duplicate detection
pub const HISTORY_SIZE: usize = 4;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct HistoryItem {
    message_id: MessageId,
    family: TransportFlags,
    token: [u8; MAX_TOKEN_LEN],
    token_len: usize,
}

impl HistoryItem {
    fn new(message_id: MessageId, token: &Token, family: TransportFlags) -> Self {
        let token_len = token.len().min(MAX_TOKEN_LEN);
        let mut bytes = [0u8; MAX_TOKEN_LEN];
        bytes[..token_len].copy_from_slice(&token.as_bytes()[..token_len]);
        Self {
            message_id,
            family: family & TransportFlags::IP_FAMILY_MASK,
            token: bytes,
            token_len,
        }
    }

    fn same_message(&self, other: &HistoryItem) -> bool {
        self.message_id == other.message_id
            && self.token_len == other.token_len
            && self.token[..self.token_len] == other.token[..other.token_len]
    }
}

/// Fixed ring of recently seen `(message id, token, address family)` entries.
///
/// A request counts as a duplicate when the same message id and token were
/// last recorded from the *other* IP family, which is what a dual-stack
/// multicast looks like when it lands once per family.
pub struct DuplicateHistory<const N: usize = HISTORY_SIZE> {
    items: [HistoryItem; N],
    next_index: usize,
}

impl<const N: usize> DuplicateHistory<N> {
    pub fn new() -> Self {
        Self {
            items: std::array::from_fn(|_| HistoryItem::default()),
            next_index: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Records the message and reports whether it duplicates a recent one
    /// received over the other address family.
    pub fn check_and_record(
        &mut self,
        message_id: MessageId,
        token: &Token,
        family: TransportFlags,
    ) -> bool {
        let family = family & TransportFlags::IP_FAMILY_MASK;
        if family.is_empty() || N == 0 {
            return false;
        }
        let item = HistoryItem::new(message_id, token, family);

        let duplicate = self
            .items
            .iter()
            .any(|seen| seen.same_message(&item) && (seen.family ^ family) == TransportFlags::IP_FAMILY_MASK);

        self.items[self.next_index] = item;
        self.next_index = (self.next_index + 1) % N;

        duplicate
    }

    /// True when the message id and token are still held, from any family.
    pub fn contains(&self, message_id: MessageId, token: &Token) -> bool {
        let probe = HistoryItem::new(message_id, token, TransportFlags::empty());
        self.items
            .iter()
            .any(|seen| !seen.family.is_empty() && seen.same_message(&probe))
    }
}

impl<const N: usize> Default for DuplicateHistory<N> {
    fn default() -> Self {
        Self::new()
    }
}
