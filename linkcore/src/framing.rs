//! Response framing.
//!
//! Splits the continuous byte stream coming off the socket into response
//! units, either by scanning for a delimiter byte or by reading a big-endian
//! length prefix. Decoded units are turned into text with UTF-8.

use crate::error::{ClientError, Result};
use bytes::{Buf, Bytes, BytesMut};
use log::trace;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

pub const DEFAULT_DELIMITER: u8 = b'\n';

/// Width of the big-endian length header used by [`Framing::LengthPrefix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrefixWidth {
    U8,
    U16,
    U24,
    #[default]
    U32,
}

impl PrefixWidth {
    pub const fn header_len(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U24 => 3,
            Self::U32 => 4,
        }
    }

    pub const fn max_len(self) -> usize {
        match self {
            Self::U8 => u8::MAX as usize,
            Self::U16 => u16::MAX as usize,
            Self::U24 => (1 << 24) - 1,
            Self::U32 => u32::MAX as usize,
        }
    }

    fn read(self, header: &[u8]) -> usize {
        header[..self.header_len()]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize)
    }

    fn write(self, len: usize, out: &mut Vec<u8>) {
        let bytes = (len as u32).to_be_bytes();
        out.extend_from_slice(&bytes[4 - self.header_len()..]);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Framing {
    /// Units end at the delimiter byte; the delimiter is not part of the unit.
    Delimiter(u8),
    /// Units are preceded by their length.
    LengthPrefix(PrefixWidth),
}

impl Default for Framing {
    fn default() -> Self {
        Self::Delimiter(DEFAULT_DELIMITER)
    }
}

impl Framing {
    /// Frames an outgoing payload with the same rule used for responses.
    /// Useful for peers and tests; `SocketClient::send` itself never frames.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        match *self {
            Framing::Delimiter(delim) => {
                let mut out = Vec::with_capacity(payload.len() + 1);
                out.extend_from_slice(payload);
                out.push(delim);
                Ok(out)
            }
            Framing::LengthPrefix(width) => {
                if payload.len() > width.max_len() {
                    return Err(ClientError::FrameTooLarge {
                        max: width.max_len(),
                        got: payload.len(),
                    });
                }
                let mut out = Vec::with_capacity(width.header_len() + payload.len());
                width.write(payload.len(), &mut out);
                out.extend_from_slice(payload);
                Ok(out)
            }
        }
    }
}

/// How bytes that are not valid UTF-8 are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecodePolicy {
    /// Invalid sequences become U+FFFD.
    #[default]
    Replace,
    /// The whole unit is dropped and reported as a decode error.
    Drop,
}

impl DecodePolicy {
    pub fn decode(self, unit: Bytes) -> Result<String> {
        match self {
            DecodePolicy::Replace => Ok(String::from_utf8_lossy(&unit).into_owned()),
            DecodePolicy::Drop => Ok(String::from_utf8(unit.to_vec())?),
        }
    }
}

/// The receive buffer. Accumulates delivered bytes and hands out complete
/// units; a partial unit stays buffered until the rest arrives.
pub struct FrameDecoder {
    framing: Framing,
    max_unit: Option<NonZeroUsize>,
    buffer: BytesMut,
    // Delimiter framing: bytes already scanned without finding the delimiter.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new(framing: Framing, max_unit: Option<NonZeroUsize>) -> Self {
        Self {
            framing,
            max_unit,
            buffer: BytesMut::new(),
            scanned: 0,
        }
    }

    /// Feeds raw data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }

    /// Attempts to decode the next complete unit from the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed and `FrameTooLarge` when
    /// the unit being assembled already exceeds the configured maximum.
    pub fn decode_frame(&mut self) -> Result<Option<Bytes>> {
        match self.framing {
            Framing::Delimiter(delim) => self.decode_delimited(delim),
            Framing::LengthPrefix(width) => self.decode_prefixed(width),
        }
    }

    fn decode_delimited(&mut self, delim: u8) -> Result<Option<Bytes>> {
        let found = self.buffer[self.scanned..]
            .iter()
            .position(|b| *b == delim)
            .map(|pos| self.scanned + pos);

        match found {
            Some(end) => {
                self.check_size(end)?;
                let unit = self.buffer.split_to(end).freeze();
                self.buffer.advance(1);
                self.scanned = 0;
                trace!("<-- Decoded unit: {} bytes", unit.len());
                Ok(Some(unit))
            }
            None => {
                self.scanned = self.buffer.len();
                self.check_size(self.buffer.len())?;
                Ok(None)
            }
        }
    }

    fn decode_prefixed(&mut self, width: PrefixWidth) -> Result<Option<Bytes>> {
        let header_len = width.header_len();
        if self.buffer.len() < header_len {
            return Ok(None);
        }

        let unit_len = width.read(&self.buffer);
        self.check_size(unit_len)?;

        if self.buffer.len() >= header_len + unit_len {
            self.buffer.advance(header_len);
            let unit = self.buffer.split_to(unit_len).freeze();
            trace!("<-- Decoded unit: {} bytes", unit.len());
            Ok(Some(unit))
        } else {
            Ok(None)
        }
    }

    fn check_size(&self, len: usize) -> Result<()> {
        match self.max_unit {
            Some(max) if len > max.get() => Err(ClientError::FrameTooLarge {
                max: max.get(),
                got: len,
            }),
            _ => Ok(()),
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(Framing::default(), None)
    }
}
