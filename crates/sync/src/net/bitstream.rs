//! Bit-packed serialization streams.
//!
//! Each wire message is described by a single serialize routine that runs in
//! one of three modes: writing ([`WriteStream`]), reading ([`ReadStream`]) or
//! measuring ([`MeasureStream`], a dry run that only counts bits so packets
//! can be pre-sized). Bits are packed LSB-first within each byte; bytes are
//! emitted in stream order, so the layout is identical on both peers.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("write past end of buffer at bit {0}")]
    Overflow(usize),
    #[error("read past end of buffer at bit {0}")]
    Underflow(usize),
    #[error("value {value} outside range [{min}, {max}]")]
    OutOfRange { value: i64, min: i64, max: i64 },
    #[error("expected zero padding at bit {0}")]
    BadAlign(usize),
}

/// Number of bits needed to represent any value in `[0, max]`.
#[inline]
pub fn bits_required(max: u32) -> u32 {
    if max == 0 {
        0
    } else {
        32 - max.leading_zeros()
    }
}

/// One serialize routine per message, three stream modes.
///
/// Every method takes the in-memory value and returns the wire value: writers
/// and measurers pass the input through, readers return what was decoded.
/// Code that must branch on direction (computing a changed set, choosing an
/// encoding) checks `IS_WRITING` / `IS_READING`, exactly mirroring the other
/// peer's control path.
pub trait BitSerializer {
    /// True for both the write stream and the measure stream.
    const IS_WRITING: bool;
    const IS_READING: bool;

    fn serialize_bits(&mut self, value: u32, bits: u32) -> Result<u32, StreamError>;

    fn serialize_align(&mut self) -> Result<(), StreamError>;

    fn serialize_bytes(&mut self, bytes: &mut [u8]) -> Result<(), StreamError>;

    fn bits_processed(&self) -> usize;

    fn serialize_bool(&mut self, value: bool) -> Result<bool, StreamError> {
        Ok(self.serialize_bits(value as u32, 1)? != 0)
    }

    fn serialize_u16(&mut self, value: u16) -> Result<u16, StreamError> {
        Ok(self.serialize_bits(value as u32, 16)? as u16)
    }

    fn serialize_u32(&mut self, value: u32) -> Result<u32, StreamError> {
        self.serialize_bits(value, 32)
    }

    /// Ranged integer in `ceil(log2(max - min + 1))` bits.
    ///
    /// Writing a value outside `[min, max]` is an error, not a clamp; reading
    /// a wire value that lands past `max` is a protocol violation.
    fn serialize_int(&mut self, value: i32, min: i32, max: i32) -> Result<i32, StreamError> {
        debug_assert!(min <= max);
        if Self::IS_WRITING && (value < min || value > max) {
            return Err(StreamError::OutOfRange {
                value: value as i64,
                min: min as i64,
                max: max as i64,
            });
        }
        let range = (max as i64 - min as i64) as u32;
        let bits = bits_required(range);
        if bits == 0 {
            // Degenerate single-value range: nothing goes on the wire.
            return Ok(min);
        }
        let relative = if Self::IS_WRITING {
            (value as i64 - min as i64) as u32
        } else {
            0
        };
        let raw = self.serialize_bits(relative, bits)?;
        if Self::IS_READING {
            let decoded = min as i64 + raw as i64;
            if decoded > max as i64 {
                return Err(StreamError::OutOfRange {
                    value: decoded,
                    min: min as i64,
                    max: max as i64,
                });
            }
            Ok(decoded as i32)
        } else {
            Ok(value)
        }
    }
}

/// Packs bits into an owned buffer, bounded by a byte capacity.
#[derive(Debug)]
pub struct WriteStream {
    buffer: Vec<u8>,
    capacity: usize,
    scratch: u64,
    scratch_bits: u32,
    bits_written: usize,
}

impl WriteStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity.min(4096)),
            capacity,
            scratch: 0,
            scratch_bits: 0,
            bits_written: 0,
        }
    }

    fn flush_scratch(&mut self) -> Result<(), StreamError> {
        while self.scratch_bits >= 8 {
            if self.buffer.len() >= self.capacity {
                return Err(StreamError::Overflow(self.bits_written));
            }
            self.buffer.push((self.scratch & 0xFF) as u8);
            self.scratch >>= 8;
            self.scratch_bits -= 8;
        }
        Ok(())
    }

    /// Flushes any partial byte (zero padded) and returns the packed bytes.
    pub fn finish(mut self) -> Result<Vec<u8>, StreamError> {
        if self.scratch_bits > 0 {
            if self.buffer.len() >= self.capacity {
                return Err(StreamError::Overflow(self.bits_written));
            }
            self.buffer.push((self.scratch & 0xFF) as u8);
        }
        Ok(self.buffer)
    }
}

impl BitSerializer for WriteStream {
    const IS_WRITING: bool = true;
    const IS_READING: bool = false;

    fn serialize_bits(&mut self, value: u32, bits: u32) -> Result<u32, StreamError> {
        debug_assert!(bits >= 1 && bits <= 32);
        let mask = if bits == 32 { u32::MAX } else { (1 << bits) - 1 };
        let value = value & mask;
        self.scratch |= (value as u64) << self.scratch_bits;
        self.scratch_bits += bits;
        self.bits_written += bits as usize;
        self.flush_scratch()?;
        Ok(value)
    }

    fn serialize_align(&mut self) -> Result<(), StreamError> {
        let remainder = self.bits_written % 8;
        if remainder != 0 {
            self.serialize_bits(0, 8 - remainder as u32)?;
        }
        Ok(())
    }

    fn serialize_bytes(&mut self, bytes: &mut [u8]) -> Result<(), StreamError> {
        self.serialize_align()?;
        debug_assert_eq!(self.scratch_bits, 0);
        if self.buffer.len() + bytes.len() > self.capacity {
            return Err(StreamError::Overflow(self.bits_written));
        }
        self.buffer.extend_from_slice(bytes);
        self.bits_written += bytes.len() * 8;
        Ok(())
    }

    fn bits_processed(&self) -> usize {
        self.bits_written
    }
}

/// Unpacks bits from a received buffer, failing on underflow.
#[derive(Debug)]
pub struct ReadStream<'a> {
    buffer: &'a [u8],
    byte_index: usize,
    scratch: u64,
    scratch_bits: u32,
    bits_read: usize,
}

impl<'a> ReadStream<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            byte_index: 0,
            scratch: 0,
            scratch_bits: 0,
            bits_read: 0,
        }
    }
}

impl BitSerializer for ReadStream<'_> {
    const IS_WRITING: bool = false;
    const IS_READING: bool = true;

    fn serialize_bits(&mut self, _value: u32, bits: u32) -> Result<u32, StreamError> {
        debug_assert!(bits >= 1 && bits <= 32);
        while self.scratch_bits < bits {
            if self.byte_index >= self.buffer.len() {
                return Err(StreamError::Underflow(self.bits_read));
            }
            self.scratch |= (self.buffer[self.byte_index] as u64) << self.scratch_bits;
            self.byte_index += 1;
            self.scratch_bits += 8;
        }
        let mask = if bits == 32 { u32::MAX } else { (1 << bits) - 1 };
        let value = (self.scratch as u32) & mask;
        self.scratch >>= bits;
        self.scratch_bits -= bits;
        self.bits_read += bits as usize;
        Ok(value)
    }

    fn serialize_align(&mut self) -> Result<(), StreamError> {
        let remainder = self.bits_read % 8;
        if remainder != 0 {
            let padding = self.serialize_bits(0, 8 - remainder as u32)?;
            if padding != 0 {
                return Err(StreamError::BadAlign(self.bits_read));
            }
        }
        Ok(())
    }

    fn serialize_bytes(&mut self, bytes: &mut [u8]) -> Result<(), StreamError> {
        self.serialize_align()?;
        debug_assert_eq!(self.scratch_bits, 0);
        if self.byte_index + bytes.len() > self.buffer.len() {
            return Err(StreamError::Underflow(self.bits_read));
        }
        bytes.copy_from_slice(&self.buffer[self.byte_index..self.byte_index + bytes.len()]);
        self.byte_index += bytes.len();
        self.bits_read += bytes.len() * 8;
        Ok(())
    }

    fn bits_processed(&self) -> usize {
        self.bits_read
    }
}

/// Counts the bits a write would emit without touching a buffer.
#[derive(Debug, Default)]
pub struct MeasureStream {
    bits: usize,
}

impl MeasureStream {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BitSerializer for MeasureStream {
    // Measuring follows the writer's control path.
    const IS_WRITING: bool = true;
    const IS_READING: bool = false;

    fn serialize_bits(&mut self, value: u32, bits: u32) -> Result<u32, StreamError> {
        debug_assert!(bits >= 1 && bits <= 32);
        self.bits += bits as usize;
        let mask = if bits == 32 { u32::MAX } else { (1 << bits) - 1 };
        Ok(value & mask)
    }

    fn serialize_align(&mut self) -> Result<(), StreamError> {
        let remainder = self.bits % 8;
        if remainder != 0 {
            self.bits += 8 - remainder;
        }
        Ok(())
    }

    fn serialize_bytes(&mut self, bytes: &mut [u8]) -> Result<(), StreamError> {
        self.serialize_align()?;
        self.bits += bytes.len() * 8;
        Ok(())
    }

    fn bits_processed(&self) -> usize {
        self.bits
    }
}
