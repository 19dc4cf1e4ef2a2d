mod error;
mod reassembler;

pub use error::FramingError;
pub use reassembler::{
    CoapStreamHeader, FrameHeader, Reassembler, StreamFramer, TlsRecordBuffer, TlsRecordHeader,
    TLS_HEADER_SIZE,
};
