//! Variable-length reference encoding.
//!
//! Every numeric operand in the instruction stream is written as a varint:
//! the top two bits of the first byte select the total width (1, 2, 4 or 8
//! bytes) and the remaining bits hold the value big-endian. Values at or
//! above 2^62 do not fit any width and are a hard encoding error.

use thiserror::Error;

/// Largest encodable value (2^62 - 1).
pub const MAX_VALUE: u64 = (1 << 62) - 1;

/// Error from varint encoding or decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum VarintError {
    /// Value does not fit the 2-bit-prefix scheme.
    #[error("value {0} exceeds varint range (max {MAX_VALUE})")]
    OutOfRange(u64),
    /// Input ended inside an encoded value.
    #[error("unexpected end of input while reading varint")]
    UnexpectedEof,
}

/// Width prefix for a value: 0..=3, or an error above the range.
pub fn prefix_for(value: u64) -> Result<u8, VarintError> {
    match value {
        v if v < 0x40 => Ok(0),
        v if v < 0x4000 => Ok(1),
        v if v < 0x4000_0000 => Ok(2),
        v if v < 0x4000_0000_0000_0000 => Ok(3),
        v => Err(VarintError::OutOfRange(v)),
    }
}

/// Append the varint encoding of `value` to `out`.
pub fn write_varint(value: u64, out: &mut Vec<u8>) -> Result<(), VarintError> {
    let prefix = prefix_for(value)?;
    let len = 1usize << prefix;
    let shifted = value | (u64::from(prefix) << (len * 8 - 2));
    let bytes = shifted.to_be_bytes();
    out.extend_from_slice(&bytes[8 - len..]);
    Ok(())
}

/// Read one varint from the front of `input`, advancing it.
pub fn read_varint(input: &mut &[u8]) -> Result<u64, VarintError> {
    let first = *input.first().ok_or(VarintError::UnexpectedEof)?;
    let prefix = first >> 6;
    let len = 1usize << prefix;
    if input.len() < len {
        return Err(VarintError::UnexpectedEof);
    }
    let mut bytes = [0u8; 8];
    bytes[8 - len..].copy_from_slice(&input[..len]);
    let mut value = u64::from_be_bytes(bytes);
    // Clear the prefix bits.
    value &= !(0b11 << (len * 8 - 2));
    *input = &input[len..];
    Ok(value)
}
