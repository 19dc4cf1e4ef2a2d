use thiserror::Error;

/// Errors that can occur while reassembling messages from a byte stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// Declared message size is larger than the configured limit (SECURITY: potentially malicious peer)
    #[error("Framed message of {length} bytes exceeds the {max} byte limit. The stream is no longer usable")]
    MessageTooLarge { length: usize, max: usize },

    /// Declared message size cannot be represented on this platform
    #[error("Framed message length does not fit in memory")]
    LengthOverflow,
}
