use std::fmt;

use crate::error::{CaError, CaResult};

/// Largest token a CoAP message may carry
pub const MAX_TOKEN_LEN: usize = 8;

/// Opaque request/response correlation token, at most `MAX_TOKEN_LEN` bytes
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Token(Vec<u8>);

impl Token {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn new(bytes: &[u8]) -> CaResult<Self> {
        if bytes.len() > MAX_TOKEN_LEN {
            return Err(CaError::InvalidParam {
                reason: "token is longer than 8 bytes",
            });
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Generates a random token of `len` bytes
    pub fn generate(len: usize) -> CaResult<Self> {
        if len == 0 || len > MAX_TOKEN_LEN {
            return Err(CaError::InvalidParam {
                reason: "token length must be between 1 and 8",
            });
        }
        let mut bytes = vec![0u8; len];
        for byte in bytes.iter_mut() {
            *byte = fastrand::u8(..);
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}
