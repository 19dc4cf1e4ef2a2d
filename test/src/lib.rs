pub mod helpers;
pub mod local_adapter;

pub use helpers::*;
pub use local_adapter::{LocalAdapter, LocalAdapterHandle, SentPacket};
