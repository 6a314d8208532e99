use roaring::RoaringTreemap;
use crate::compression::delta::DeltaEncoder;
use crate::core::error::Result;
use crate::core::types::RecordId;

/// Posting list for a term
/// Note: Sorted by record id, no duplicates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingList {
    pub ids: Vec<RecordId>,
}

impl PostingList {
    pub fn new() -> Self {
        PostingList { ids: Vec::new() }
    }

    /// Returns false if the id was already present.
    pub fn add(&mut self, id: RecordId) -> bool {
        match self.ids.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.ids.insert(pos, id);
                true
            }
        }
    }

    pub fn remove(&mut self, id: RecordId) -> bool {
        match self.ids.binary_search(&id) {
            Ok(pos) => {
                self.ids.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Intersect two posting lists (simple linear merge)
    pub fn intersect(&self, other: &PostingList) -> PostingList {
        let mut result = Vec::new();
        let mut i = 0;
        let mut j = 0;

        while i < self.ids.len() && j < other.ids.len() {
            let a = self.ids[i];
            let b = other.ids[j];

            if a == b {
                result.push(a);
                i += 1;
                j += 1;
            } else if a < b {
                i += 1;
            } else {
                j += 1;
            }
        }

        PostingList { ids: result }
    }

    pub fn to_bitmap(&self) -> RoaringTreemap {
        self.ids.iter().copied().collect()
    }

    pub fn encode(&self) -> Vec<u8> {
        DeltaEncoder::encode_u64_list(&self.ids)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(PostingList {
            ids: DeltaEncoder::decode_u64_list(data)?,
        })
    }
}
