use std::{marker::PhantomData, mem};

use log::trace;

use crate::{coap::tcp_header, connection::FramingError};

/// Length prefix understood by a [`Reassembler`]
pub trait FrameHeader {
    /// How many leading bytes must be buffered before the total length is
    /// known, given the bytes buffered so far (never empty).
    fn prefix_length(buffered: &[u8]) -> usize;

    /// Total message size, called once `prefix_length` bytes are buffered.
    fn total_length(prefix: &[u8]) -> Option<usize>;
}

/// CoAP over TCP length header
pub struct CoapStreamHeader;

impl FrameHeader for CoapStreamHeader {
    fn prefix_length(buffered: &[u8]) -> usize {
        1 + tcp_header::extended_length_size(buffered[0] >> 4)
    }

    fn total_length(prefix: &[u8]) -> Option<usize> {
        tcp_header::total_length(prefix)
    }
}

/// TLS record header: content type, version, 16-bit length
pub struct TlsRecordHeader;

pub const TLS_HEADER_SIZE: usize = 5;

impl FrameHeader for TlsRecordHeader {
    fn prefix_length(_buffered: &[u8]) -> usize {
        TLS_HEADER_SIZE
    }

    fn total_length(prefix: &[u8]) -> Option<usize> {
        let length = u16::from_be_bytes([*prefix.get(3)?, *prefix.get(4)?]) as usize;
        Some(TLS_HEADER_SIZE + length)
    }
}

/// Incremental reassembly of length-prefixed messages from a byte stream.
///
/// `expected` stays 0 until the length prefix has been read in full, and the
/// buffer never grows past `expected` once it is known. The buffer starts
/// unallocated and grows to the size of the message being read, bounded by
/// `max_message_size`.
pub struct Reassembler<H: FrameHeader> {
    buffer: Vec<u8>,
    expected: usize,
    max_message_size: usize,
    phantom: PhantomData<H>,
}

pub type StreamFramer = Reassembler<CoapStreamHeader>;
pub type TlsRecordBuffer = Reassembler<TlsRecordHeader>;

impl<H: FrameHeader> Reassembler<H> {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            expected: 0,
            max_message_size,
            phantom: PhantomData,
        }
    }

    /// Bytes of the current message received so far
    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    /// Total size of the current message, 0 while the header is incomplete
    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn reset(&mut self) {
        self.buffer = Vec::new();
        self.expected = 0;
    }

    /// Consumes `data`, returning every message it completed in arrival order.
    ///
    /// On error the partial message is discarded; the caller is expected to
    /// drop the stream since its framing can no longer be trusted.
    pub fn feed(&mut self, mut data: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
        let mut messages = Vec::new();

        while !data.is_empty() {
            if self.expected == 0 {
                let needed = if self.buffer.is_empty() {
                    1
                } else {
                    H::prefix_length(&self.buffer)
                };
                if self.buffer.len() < needed {
                    let take = (needed - self.buffer.len()).min(data.len());
                    self.buffer.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    continue;
                }

                let Some(total) = H::total_length(&self.buffer) else {
                    self.reset();
                    return Err(FramingError::LengthOverflow);
                };
                if total > self.max_message_size {
                    self.reset();
                    return Err(FramingError::MessageTooLarge {
                        length: total,
                        max: self.max_message_size,
                    });
                }
                trace!("Framed message header read, expecting {} bytes", total);
                self.expected = total;
                self.buffer.reserve_exact(total - self.buffer.len());
            }

            let take = (self.expected - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.buffer.len() == self.expected {
                messages.push(mem::take(&mut self.buffer));
                self.expected = 0;
            }
        }

        Ok(messages)
    }
}
