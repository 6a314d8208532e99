use crate::core::error::{Error, ErrorKind, Result};

/// Variable byte encoding for integers (best for small integers)
pub struct VByteEncoder;

impl VByteEncoder {
    /// Values < 128 use 1 byte, < 16384 use 2 bytes, up to 10 bytes for u64::MAX.
    pub fn encode_u64(output: &mut Vec<u8>, mut value: u64) {
        while value >= 128 {
            output.push((value & 127) as u8 | 128);  // Set continuation bit
            value >>= 7;
        }
        output.push(value as u8);  // Last byte without continuation bit
    }

    /// Decode single u64 value, returns (value, bytes_consumed)
    pub fn decode_u64(input: &[u8]) -> Result<(u64, usize)> {
        let mut value = 0u64;
        let mut shift = 0u32;

        for (consumed, &byte) in input.iter().enumerate() {
            if shift > 63 || (shift == 63 && byte & 127 > 1) {
                return Err(Error::new(ErrorKind::Parse, "VByte overflow".to_string()));
            }
            value |= ((byte & 127) as u64) << shift;

            if byte & 128 == 0 {  // No continuation bit
                return Ok((value, consumed + 1));
            }

            shift += 7;
        }

        Err(Error::new(ErrorKind::Parse, "Incomplete VByte".to_string()))
    }
}
