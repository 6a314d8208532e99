use crate::compression::vbyte::VByteEncoder;
use crate::core::error::{Error, ErrorKind, Result};

/// Delta encoding for sorted record ids (posting lists).
///
/// Layout: varint count, varint first id, then varint gaps.
pub struct DeltaEncoder;

impl DeltaEncoder {
    pub fn encode_u64_list(ids: &[u64]) -> Vec<u8> {
        let mut output = Vec::with_capacity(ids.len() + 2);
        VByteEncoder::encode_u64(&mut output, ids.len() as u64);

        let mut prev = 0u64;
        for (i, &id) in ids.iter().enumerate() {
            let delta = if i == 0 { id } else { id - prev };
            VByteEncoder::encode_u64(&mut output, delta);
            prev = id;
        }

        output
    }

    pub fn decode_u64_list(data: &[u8]) -> Result<Vec<u64>> {
        let (count, mut pos) = VByteEncoder::decode_u64(data)?;
        // Every id takes at least one byte
        if count > (data.len() - pos) as u64 {
            return Err(Error::new(ErrorKind::Parse, format!("posting count {} exceeds data", count)));
        }

        let mut ids = Vec::with_capacity(count as usize);
        let mut prev = 0u64;

        for i in 0..count {
            let (delta, consumed) = VByteEncoder::decode_u64(&data[pos..])?;
            pos += consumed;

            let id = if i == 0 {
                delta
            } else {
                prev.checked_add(delta)
                    .filter(|_| delta > 0)
                    .ok_or_else(|| Error::new(ErrorKind::Parse, "posting list not strictly ascending".to_string()))?
            };
            ids.push(id);
            prev = id;
        }

        if pos != data.len() {
            return Err(Error::new(ErrorKind::Parse, "trailing bytes after posting list".to_string()));
        }

        Ok(ids)
    }
}
