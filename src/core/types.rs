use serde::{Serialize, Deserialize};
use crate::core::error::{Error, ErrorKind, Result};

/// Record identifier as seen by callers.
pub type RecordId = u64;

/// Which facade a file was created for. Stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreKind {
    /// Single opaque payload per record
    Idb,
    /// Ordered sequence of fields per record
    Jdb,
}

impl StoreKind {
    pub fn code(&self) -> u8 {
        match self {
            StoreKind::Idb => 1,
            StoreKind::Jdb => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(StoreKind::Idb),
            2 => Ok(StoreKind::Jdb),
            other => Err(Error::corrupt(format!("unknown store kind {}", other))),
        }
    }

    /// Serialize record fields into the blob kept by the record table.
    pub fn encode_fields(&self, fields: &[Vec<u8>]) -> Result<Vec<u8>> {
        match self {
            StoreKind::Idb => match fields {
                [single] => Ok(single.clone()),
                _ => Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!("IDB records hold exactly one payload, got {} fields", fields.len()),
                )),
            },
            StoreKind::Jdb => Ok(bincode::serialize(fields)?),
        }
    }

    pub fn decode_fields(&self, blob: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        match self {
            StoreKind::Idb => Ok(vec![blob]),
            StoreKind::Jdb => Ok(bincode::deserialize(&blob)?),
        }
    }
}

/// A live record with its fields in stored order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    pub fields: Vec<Vec<u8>>,
}

impl Record {
    pub fn new(id: RecordId, fields: Vec<Vec<u8>>) -> Self {
        Record { id, fields }
    }
}
