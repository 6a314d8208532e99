use crate::core::error::{Error, ErrorKind, Result};

/// Codec applied to record payloads. The tag is stored with every entry,
/// so changing `Config::compression` never breaks existing records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    LZ4,      // Fast compression (~500 MB/s), ratio 2-3x
    Zstd,     // Better ratio (3-5x), slower (~200 MB/s)
    Snappy,   // Balanced (2-3x ratio, ~300 MB/s)
}

impl CompressionType {
    pub fn tag(&self) -> u8 {
        match self {
            CompressionType::None => 0,
            CompressionType::LZ4 => 1,
            CompressionType::Zstd => 2,
            CompressionType::Snappy => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::LZ4),
            2 => Ok(CompressionType::Zstd),
            3 => Ok(CompressionType::Snappy),
            other => Err(Error::corrupt(format!("unknown payload codec tag {}", other))),
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            CompressionType::None => Ok(data.to_vec()),

            // Size is prepended so decompression needs no side channel
            CompressionType::LZ4 => Ok(lz4::block::compress(data, None, true)?),

            CompressionType::Zstd => Ok(zstd::encode_all(data, 3)?),  // Level 3 is balanced

            CompressionType::Snappy => {
                let mut encoder = snap::raw::Encoder::new();
                encoder.compress_vec(data)
                    .map_err(|e| Error::new(ErrorKind::Io, e.to_string()))
            }
        }
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            CompressionType::None => Ok(data.to_vec()),

            CompressionType::LZ4 => lz4::block::decompress(data, None)
                .map_err(|e| Error::corrupt(format!("lz4 payload: {}", e))),

            CompressionType::Zstd => zstd::decode_all(data)
                .map_err(|e| Error::corrupt(format!("zstd payload: {}", e))),

            CompressionType::Snappy => {
                let mut decoder = snap::raw::Decoder::new();
                decoder.decompress_vec(data)
                    .map_err(|e| Error::corrupt(format!("snappy payload: {}", e)))
            }
        }
    }
}
