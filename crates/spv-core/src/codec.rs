//! Binary encoding shared by stored headers and filter wire messages.
//!
//! Integers are little-endian. Lengths and counts use the Bitcoin
//! CompactSize var-int, and decoders reject non-canonical forms so every
//! value has exactly one encoding.

use bytes::{Buf, BufMut};

use crate::error::CodecError;
use crate::types::Hash256;

/// Upper bound on any length prefix we are willing to allocate for.
pub const MAX_VAR_BYTES: u64 = 4 * 1024 * 1024;

/// Types with a canonical binary encoding.
pub trait Encodable {
    fn encode<B: BufMut>(&self, buf: &mut B);

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

/// Types decodable from their canonical binary encoding.
pub trait Decodable: Sized {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError>;

    /// Decode a complete record, rejecting trailing bytes.
    fn from_bytes(mut data: &[u8]) -> Result<Self, CodecError> {
        let value = Self::decode(&mut data)?;
        if !data.is_empty() {
            return Err(CodecError::TrailingBytes(data.len()));
        }
        Ok(value)
    }
}

fn ensure<B: Buf>(buf: &B, needed: usize) -> Result<(), CodecError> {
    if buf.remaining() < needed {
        return Err(CodecError::UnexpectedEof {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

pub fn read_u8<B: Buf>(buf: &mut B) -> Result<u8, CodecError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn read_u16<B: Buf>(buf: &mut B) -> Result<u16, CodecError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16_le())
}

pub fn read_u32<B: Buf>(buf: &mut B) -> Result<u32, CodecError> {
    ensure(buf, 4)?;
    Ok(buf.get_u32_le())
}

pub fn read_u64<B: Buf>(buf: &mut B) -> Result<u64, CodecError> {
    ensure(buf, 8)?;
    Ok(buf.get_u64_le())
}

pub fn read_hash<B: Buf>(buf: &mut B) -> Result<Hash256, CodecError> {
    ensure(buf, 32)?;
    let mut bytes = [0u8; 32];
    buf.copy_to_slice(&mut bytes);
    Ok(Hash256(bytes))
}

pub fn read_array<B: Buf, const N: usize>(buf: &mut B) -> Result<[u8; N], CodecError> {
    ensure(buf, N)?;
    let mut bytes = [0u8; N];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

/// Write a CompactSize var-int.
pub fn write_var_int<B: BufMut>(buf: &mut B, value: u64) {
    match value {
        0..=0xfc => buf.put_u8(value as u8),
        0xfd..=0xffff => {
            buf.put_u8(0xfd);
            buf.put_u16_le(value as u16);
        }
        0x1_0000..=0xffff_ffff => {
            buf.put_u8(0xfe);
            buf.put_u32_le(value as u32);
        }
        _ => {
            buf.put_u8(0xff);
            buf.put_u64_le(value);
        }
    }
}

/// Read a CompactSize var-int, rejecting non-minimal encodings.
pub fn read_var_int<B: Buf>(buf: &mut B) -> Result<u64, CodecError> {
    let (value, min) = match read_u8(buf)? {
        0xfd => (read_u16(buf)? as u64, 0xfd),
        0xfe => (read_u32(buf)? as u64, 0x1_0000),
        0xff => (read_u64(buf)?, 0x1_0000_0000),
        small => return Ok(small as u64),
    };
    if value < min {
        return Err(CodecError::NonCanonicalVarInt);
    }
    Ok(value)
}

/// Read a var-int used as a length or count, bounded by `max`.
pub fn read_length<B: Buf>(buf: &mut B, max: u64) -> Result<usize, CodecError> {
    let len = read_var_int(buf)?;
    if len > max {
        return Err(CodecError::LengthTooLarge { len, max });
    }
    Ok(len as usize)
}

pub fn write_var_bytes<B: BufMut>(buf: &mut B, bytes: &[u8]) {
    write_var_int(buf, bytes.len() as u64);
    buf.put_slice(bytes);
}

pub fn read_var_bytes<B: Buf>(buf: &mut B, max: u64) -> Result<Vec<u8>, CodecError> {
    let len = read_length(buf, max)?;
    ensure(buf, len)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var_int_bytes(value: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        write_var_int(&mut buf, value);
        buf
    }

    #[test]
    fn var_int_widths() {
        assert_eq!(var_int_bytes(0).len(), 1);
        assert_eq!(var_int_bytes(0xfc).len(), 1);
        assert_eq!(var_int_bytes(0xfd).len(), 3);
        assert_eq!(var_int_bytes(0xffff).len(), 3);
        assert_eq!(var_int_bytes(0x1_0000).len(), 5);
        assert_eq!(var_int_bytes(0xffff_ffff).len(), 5);
        assert_eq!(var_int_bytes(0x1_0000_0000).len(), 9);
    }

    #[test]
    fn var_int_boundaries_decode() {
        for value in [0u64, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, u64::MAX] {
            let bytes = var_int_bytes(value);
            assert_eq!(read_var_int(&mut bytes.as_slice()).unwrap(), value);
        }
    }

    #[test]
    fn non_canonical_var_int_rejected() {
        // 0x10 encoded with the 3-byte form.
        let bytes = [0xfd, 0x10, 0x00];
        assert_eq!(
            read_var_int(&mut &bytes[..]),
            Err(CodecError::NonCanonicalVarInt)
        );
    }

    #[test]
    fn truncated_input_reports_eof() {
        let bytes = [0xfe, 0x01];
        let err = read_var_int(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof { needed: 4, remaining: 1 }));
    }

    #[test]
    fn var_bytes_length_cap() {
        let mut buf = Vec::new();
        write_var_bytes(&mut buf, &[7u8; 10]);
        let err = read_var_bytes(&mut buf.as_slice(), 9).unwrap_err();
        assert_eq!(err, CodecError::LengthTooLarge { len: 10, max: 9 });
        assert_eq!(read_var_bytes(&mut buf.as_slice(), 10).unwrap(), vec![7u8; 10]);
    }
}
