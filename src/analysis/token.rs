/// Token representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub bytes: Vec<u8>,    // The token bytes, normalized by filters
    pub position: u32,     // Ordinal within the field
    pub offset: usize,     // Byte offset in the original field
    pub field: usize,      // Field index (always 0 for single-payload records)
}

impl Token {
    pub fn new(bytes: Vec<u8>, position: u32, offset: usize, field: usize) -> Self {
        Token {
            bytes,
            position,
            offset,
            field,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
