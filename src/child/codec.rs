//! Line framing for the child's NDJSON stream.
//!
//! One decoded line is one JSON event. The codec carries a byte cap so an
//! unterminated or runaway line from a misbehaving child fails fast
//! instead of ballooning the read buffer; the writer side appends the
//! `\n` delimiter when encoding.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Default cap on a single child line: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Capped UTF-8 line codec for the child event stream.
#[derive(Debug)]
pub struct StreamCodec {
    inner: LinesCodec,
    limit: usize,
}

impl StreamCodec {
    /// A codec with the default [`MAX_LINE_BYTES`] cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }

    /// A codec with a custom line cap.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(limit),
            limit,
        }
    }

    /// The active line cap in bytes.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    fn map_error(&self, e: LinesCodecError) -> AppError {
        match e {
            LinesCodecError::MaxLineLengthExceeded => {
                AppError::Child(format!("child line exceeded {} bytes", self.limit))
            }
            LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        }
    }
}

impl Default for StreamCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StreamCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next complete line; `Ok(None)` while still buffering.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let decoded = self.inner.decode(src);
        decoded.map_err(|e| self.map_error(e))
    }

    /// Decode a final unterminated line at EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let decoded = self.inner.decode_eof(src);
        decoded.map_err(|e| self.map_error(e))
    }
}

impl Encoder<String> for StreamCodec {
    type Error = AppError;

    /// Encode `item` as one `\n`-terminated line.
    ///
    /// The cap applies to decoding only; outbound messages are built by
    /// this process and already bounded.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        let encoded = self.inner.encode(item, dst);
        encoded.map_err(|e| self.map_error(e))
    }
}
