mod convert;
mod error;
mod pdu;
pub mod tcp_header;

pub use error::PduError;
pub use pdu::{HeaderForm, Pdu};
