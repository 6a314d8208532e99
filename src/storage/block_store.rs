use std::collections::BTreeMap;
use std::io::Write;
use chrono::Utc;
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::StoreKind;
use crate::storage::header::Header;
use crate::storage::medium::Medium;

/// Reference to an extent: index of its first block. Block 0 is the header,
/// so `BlockRef(0)` doubles as the null reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockRef(pub u64);

impl BlockRef {
    pub const NULL: BlockRef = BlockRef(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// [u32 block count][u32 payload len][u32 crc32 of payload]
const EXTENT_HEADER: usize = 12;

/// Largest payload an extent header can describe
const MAX_EXTENT_PAYLOAD: usize = u32::MAX as usize - EXTENT_HEADER;

const COPY_CHUNK: usize = 64 * 1024;

/// Fixed-size block manager over a `Medium`.
///
/// Every stored object is an extent of contiguous blocks. Free space is kept
/// as a first-fit map of runs, coalesced on free, persisted on `flush`.
pub struct BlockStore {
    medium: Box<dyn Medium>,
    pub header: Header,
    block_size: usize,
    capacity: Option<u64>,
    free: BTreeMap<u64, u64>,  // First block -> run length
    free_blocks: u64,
    writable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExtentInfo {
    blocks: u64,
    len: usize,
    crc: u32,
}

impl BlockStore {
    /// Initialize an empty store on `medium`, discarding previous contents.
    pub fn create(
        mut medium: Box<dyn Medium>,
        kind: StoreKind,
        block_size: usize,
        gram_len: usize,
        capacity: Option<u64>,
    ) -> Result<Self> {
        let header = Header::new(kind, block_size, gram_len);
        let header_bytes = header.total_blocks * block_size as u64;
        if let Some(cap) = capacity {
            if header_bytes > cap {
                return Err(Error::new(
                    ErrorKind::OutOfSpace,
                    format!("capacity {} cannot hold the {} byte header", cap, header_bytes),
                ));
            }
        }

        medium.set_len(header_bytes)?;

        let mut store = BlockStore {
            medium,
            header,
            block_size,
            capacity,
            free: BTreeMap::new(),
            free_blocks: 0,
            writable: true,
        };
        store.write_header()?;
        Ok(store)
    }

    /// Attach to an existing store; loads the header and the free list.
    pub fn open(medium: Box<dyn Medium>, writable: bool, capacity: Option<u64>) -> Result<Self> {
        let header = Self::read_header(medium.as_ref())?;
        let block_size = header.block_size as usize;
        if block_size < EXTENT_HEADER * 2 || !block_size.is_power_of_two() {
            return Err(Error::corrupt(format!("invalid block size {} in header", block_size)));
        }

        let mut store = BlockStore {
            medium,
            header,
            block_size,
            capacity,
            free: BTreeMap::new(),
            free_blocks: 0,
            writable,
        };
        store.load_free_list()?;

        debug!(
            medium = store.medium.name(),
            blocks = store.header.total_blocks,
            free = store.free_blocks,
            "block store opened"
        );
        Ok(store)
    }

    fn read_header(medium: &dyn Medium) -> Result<Header> {
        if medium.len() < Header::SIZE as u64 {
            return Err(Error::corrupt(format!("file too short for a header ({} bytes)", medium.len())));
        }
        let mut buf = vec![0u8; Header::SIZE];
        medium.read_at(0, &mut buf)?;
        Header::decode(&buf)
    }

    fn load_free_list(&mut self) -> Result<()> {
        self.free.clear();
        self.free_blocks = 0;

        if self.header.free_root.is_null() {
            return Ok(());
        }

        let data = self.read(self.header.free_root)?;
        let runs: Vec<(u64, u64)> = bincode::deserialize(&data)?;
        for (start, len) in runs {
            if len == 0 || start < self.data_start() || start + len > self.header.total_blocks {
                return Err(Error::corrupt(format!("free run {}+{} out of bounds", start, len)));
            }
            self.free.insert(start, len);
            self.free_blocks += len;
        }
        Ok(())
    }

    /// Re-read header and free list after another handle mutated the medium.
    pub fn refresh(&mut self) -> Result<()> {
        self.medium.refresh_len()?;
        self.header = Self::read_header(self.medium.as_ref())?;
        self.load_free_list()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn free_blocks(&self) -> u64 {
        self.free_blocks
    }

    pub fn medium_len(&self) -> u64 {
        self.medium.len()
    }

    fn data_start(&self) -> u64 {
        Header::blocks_for(self.block_size)
    }

    fn blocks_needed(&self, size: usize) -> Result<u64> {
        if size > MAX_EXTENT_PAYLOAD {
            return Err(Error::invalid(format!(
                "{} bytes exceed the extent limit of {} bytes",
                size, MAX_EXTENT_PAYLOAD
            )));
        }
        Ok((size + EXTENT_HEADER).div_ceil(self.block_size) as u64)
    }

    fn offset(&self, block: u64) -> u64 {
        block * self.block_size as u64
    }

    fn ensure_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(Error::read_only("block write"));
        }
        Ok(())
    }

    /// Reserve room for `size` payload bytes. The extent reads back as empty
    /// until it is written.
    pub fn alloc(&mut self, size: usize) -> Result<BlockRef> {
        self.ensure_writable()?;
        let blocks = self.blocks_needed(size)?;
        let start = self.take_run(blocks)?;
        self.write_extent(start, blocks, &[])?;
        Ok(BlockRef(start))
    }

    /// Allocate and write in one step.
    pub fn store(&mut self, data: &[u8]) -> Result<BlockRef> {
        self.ensure_writable()?;
        let blocks = self.blocks_needed(data.len())?;
        let start = self.take_run(blocks)?;
        self.write_extent(start, blocks, data)?;
        Ok(BlockRef(start))
    }

    /// Overwrite an extent in place. Fails if `data` exceeds its capacity.
    pub fn write(&mut self, r: BlockRef, data: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let info = self.extent_info(r)?;
        let capacity = info.blocks as usize * self.block_size - EXTENT_HEADER;
        if data.len() > capacity {
            return Err(Error::invalid(format!(
                "{} bytes do not fit extent {:?} of {} bytes",
                data.len(),
                r,
                capacity
            )));
        }
        self.write_extent(r.0, info.blocks, data)
    }

    /// Write `data` into `r` if it fits, otherwise relocate. Returns the ref
    /// now holding the data.
    pub fn rewrite(&mut self, r: BlockRef, data: &[u8]) -> Result<BlockRef> {
        let info = self.extent_info(r)?;
        if data.len() + EXTENT_HEADER <= info.blocks as usize * self.block_size {
            self.write(r, data)?;
            return Ok(r);
        }
        self.free(r)?;
        self.store(data)
    }

    pub fn read(&self, r: BlockRef) -> Result<Vec<u8>> {
        let info = self.extent_info(r)?;
        let mut data = vec![0u8; info.len];
        self.medium.read_at(self.offset(r.0) + EXTENT_HEADER as u64, &mut data)?;

        let mut hasher = Hasher::new();
        hasher.update(&data);
        if hasher.finalize() != info.crc {
            return Err(Error::corrupt(format!("checksum mismatch in extent {:?}", r)));
        }
        Ok(data)
    }

    pub fn free(&mut self, r: BlockRef) -> Result<()> {
        self.ensure_writable()?;
        let info = self.extent_info(r)?;
        self.release_run(r.0, info.blocks);
        Ok(())
    }

    /// Validate a reference and decode its extent header.
    fn extent_info(&self, r: BlockRef) -> Result<ExtentInfo> {
        if r.0 < self.data_start() || r.0 >= self.header.total_blocks {
            return Err(Error::corrupt(format!(
                "block ref {:?} outside data area ({} blocks)",
                r,
                self.header.total_blocks
            )));
        }
        if self.is_free(r.0) {
            return Err(Error::corrupt(format!("block ref {:?} points into free space", r)));
        }

        let mut raw = [0u8; EXTENT_HEADER];
        self.medium.read_at(self.offset(r.0), &mut raw)?;
        let blocks = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as u64;
        let len = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;
        let crc = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);

        if blocks == 0
            || r.0 + blocks > self.header.total_blocks
            || len + EXTENT_HEADER > blocks as usize * self.block_size
        {
            return Err(Error::corrupt(format!(
                "extent {:?} has invalid header (blocks={}, len={})",
                r, blocks, len
            )));
        }
        Ok(ExtentInfo { blocks, len, crc })
    }

    fn is_free(&self, block: u64) -> bool {
        self.free
            .range(..=block)
            .next_back()
            .map(|(&start, &len)| block < start + len)
            .unwrap_or(false)
    }

    fn write_extent(&mut self, start: u64, blocks: u64, data: &[u8]) -> Result<()> {
        let mut hasher = Hasher::new();
        hasher.update(data);

        let mut buf = Vec::with_capacity(EXTENT_HEADER + data.len());
        buf.extend_from_slice(&(blocks as u32).to_le_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());
        buf.extend_from_slice(data);

        let offset = self.offset(start);
        self.medium.write_at(offset, &buf)
    }

    /// First-fit over free runs, growing the medium when nothing fits.
    fn take_run(&mut self, blocks: u64) -> Result<u64> {
        let found = self.free
            .iter()
            .find(|&(_, &len)| len >= blocks)
            .map(|(&start, &len)| (start, len));

        if let Some((start, len)) = found {
            self.free.remove(&start);
            if len > blocks {
                self.free.insert(start + blocks, len - blocks);
            }
            self.free_blocks -= blocks;
            return Ok(start);
        }

        let start = self.header.total_blocks;
        let new_total = start + blocks;
        if let Some(cap) = self.capacity {
            if self.offset(new_total) > cap {
                return Err(Error::new(
                    ErrorKind::OutOfSpace,
                    format!(
                        "allocating {} blocks would exceed capacity of {} bytes",
                        blocks, cap
                    ),
                ));
            }
        }
        self.header.total_blocks = new_total;
        Ok(start)
    }

    fn release_run(&mut self, mut start: u64, mut len: u64) {
        // Coalesce with the preceding run
        if let Some((&prev_start, &prev_len)) = self.free.range(..start).next_back() {
            if prev_start + prev_len == start {
                self.free.remove(&prev_start);
                start = prev_start;
                len += prev_len;
                self.free_blocks -= prev_len;
            }
        }
        // Coalesce with the following run
        if let Some(next_len) = self.free.remove(&(start + len)) {
            len += next_len;
            self.free_blocks -= next_len;
        }

        if start + len == self.header.total_blocks {
            // Tail space goes back to the medium instead of the free list
            self.header.total_blocks = start;
        } else {
            self.free.insert(start, len);
            self.free_blocks += len;
        }
    }

    pub fn write_header(&mut self) -> Result<()> {
        self.ensure_writable()?;
        let data = self.header.encode()?;
        self.medium.write_at(0, &data)
    }

    /// Persist the header, size the medium to whole blocks and fsync.
    ///
    /// The free list is only written when the header is marked clean. While a
    /// writer is attached `free_root` stays null on disk, so a crash leaks the
    /// free runs instead of handing out blocks that are live again.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_writable()?;

        if !self.header.free_root.is_null() {
            let old = self.header.free_root;
            self.header.free_root = BlockRef::NULL;
            self.free(old)?;
        }

        if self.header.clean && !self.free.is_empty() {
            // Allocation can only shrink the list, so size it before taking the extent
            let estimate = bincode::serialized_size(&self.free_runs())? as usize;
            let root = self.alloc(estimate)?;
            let data = bincode::serialize(&self.free_runs())?;
            self.write(root, &data)?;
            self.header.free_root = root;
        }

        self.header.last_sync_millis = Utc::now().timestamp_millis();
        self.write_header()?;

        let used = self.offset(self.header.total_blocks);
        if self.medium.len() != used {
            self.medium.set_len(used)?;
        }
        self.medium.sync()
    }

    /// Stream a clean image of the store to `out`: the used blocks, then the
    /// free list as one extent past the old end. The source medium is not
    /// touched. Callers flush first when they hold the writer.
    pub fn copy_to<W: Write>(&self, out: &mut W) -> Result<u64> {
        let mut runs = self.free.clone();
        if !self.header.free_root.is_null() {
            // The image gets its own free list; the old one is just free space
            let info = self.extent_info(self.header.free_root)?;
            runs.insert(self.header.free_root.0, info.blocks);
        }
        let runs = coalesce(runs);

        let mut header = self.header.clone();
        header.clean = true;
        header.free_root = BlockRef::NULL;
        let mut free_extent = Vec::new();
        if !runs.is_empty() {
            let data = bincode::serialize(&runs)?;
            let blocks = self.blocks_needed(data.len())?;
            header.free_root = BlockRef(self.header.total_blocks);
            header.total_blocks += blocks;

            let mut hasher = Hasher::new();
            hasher.update(&data);
            free_extent.extend_from_slice(&(blocks as u32).to_le_bytes());
            free_extent.extend_from_slice(&(data.len() as u32).to_le_bytes());
            free_extent.extend_from_slice(&hasher.finalize().to_le_bytes());
            free_extent.extend_from_slice(&data);
            free_extent.resize(self.offset(blocks) as usize, 0);
        }
        out.write_all(&header.encode()?)?;

        // The last extent may end short of its final block
        let total = self.offset(self.header.total_blocks);
        let available = self.medium.len().min(total);
        let mut pos = Header::SIZE as u64;
        let mut buf = vec![0u8; COPY_CHUNK];
        while pos < total {
            let n = (total - pos).min(COPY_CHUNK as u64) as usize;
            let chunk = &mut buf[..n];
            chunk.fill(0);
            if pos < available {
                let readable = (available - pos).min(n as u64) as usize;
                self.medium.read_at(pos, &mut chunk[..readable])?;
            }
            out.write_all(chunk)?;
            pos += n as u64;
        }
        out.write_all(&free_extent)?;

        Ok(total + free_extent.len() as u64)
    }

    fn free_runs(&self) -> Vec<(u64, u64)> {
        self.free.iter().map(|(&s, &l)| (s, l)).collect()
    }
}

/// Merge touching runs of a start-ordered map.
fn coalesce(runs: BTreeMap<u64, u64>) -> Vec<(u64, u64)> {
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(runs.len());
    for (start, len) in runs {
        match merged.last_mut() {
            Some((prev_start, prev_len)) if *prev_start + *prev_len == start => *prev_len += len,
            _ => merged.push((start, len)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::medium::MemoryMedium;

    fn memory_store(capacity: Option<u64>) -> BlockStore {
        BlockStore::create(Box::new(MemoryMedium::new()), StoreKind::Idb, 64, 2, capacity).unwrap()
    }

    #[test]
    fn test_store_and_read() {
        let mut store = memory_store(None);
        let a = store.store(b"hello").unwrap();
        let b = store.store(&vec![7u8; 300]).unwrap();

        assert_eq!(store.read(a).unwrap(), b"hello");
        assert_eq!(store.read(b).unwrap(), vec![7u8; 300]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_freed_space_is_reused() {
        let mut store = memory_store(None);
        let a = store.store(&vec![1u8; 200]).unwrap();
        let _keep = store.store(b"tail").unwrap();

        store.free(a).unwrap();
        assert!(store.free_blocks() > 0);

        // Smaller allocation lands in the freed run
        let c = store.store(b"small").unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_adjacent_runs_coalesce() {
        let mut store = memory_store(None);
        let a = store.store(b"a").unwrap();
        let b = store.store(b"b").unwrap();
        let _c = store.store(b"c").unwrap();

        store.free(a).unwrap();
        store.free(b).unwrap();
        assert_eq!(store.free.len(), 1);
        assert_eq!(store.free_blocks(), 2);
    }

    #[test]
    fn test_tail_free_shrinks_store() {
        let mut store = memory_store(None);
        let before = store.header.total_blocks;
        let a = store.store(&vec![0u8; 500]).unwrap();
        store.free(a).unwrap();
        assert_eq!(store.header.total_blocks, before);
        assert_eq!(store.free_blocks(), 0);
    }

    #[test]
    fn test_invalid_refs() {
        let mut store = memory_store(None);
        let a = store.store(b"x").unwrap();
        let _b = store.store(b"y").unwrap();

        assert_eq!(store.read(BlockRef::NULL).unwrap_err().kind, ErrorKind::CorruptReference);
        assert_eq!(store.read(BlockRef(9999)).unwrap_err().kind, ErrorKind::CorruptReference);

        store.free(a).unwrap();
        assert_eq!(store.read(a).unwrap_err().kind, ErrorKind::CorruptReference);
        // Double free is caught, not silently accepted
        assert_eq!(store.free(a).unwrap_err().kind, ErrorKind::CorruptReference);
    }

    #[test]
    fn test_write_in_place_and_overflow() {
        let mut store = memory_store(None);
        let r = store.alloc(40).unwrap();
        assert!(store.read(r).unwrap().is_empty());

        store.write(r, b"fits").unwrap();
        assert_eq!(store.read(r).unwrap(), b"fits");

        let err = store.write(r, &vec![0u8; 1000]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        let moved = store.rewrite(r, &vec![3u8; 1000]).unwrap();
        assert_eq!(store.read(moved).unwrap(), vec![3u8; 1000]);
    }

    #[test]
    fn test_fixed_capacity() {
        let mut store = memory_store(Some(64 * 8));
        store.store(&vec![0u8; 64 * 4]).unwrap();
        let err = store.store(&vec![0u8; 64 * 4]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfSpace);
    }

    #[test]
    fn test_copy_image_reopens_clean() {
        let mut store = memory_store(None);
        let a = store.store(b"copied").unwrap();
        store.header.clean = false;
        store.write_header().unwrap();

        let mut image = Vec::new();
        let len = store.copy_to(&mut image).unwrap();
        assert_eq!(len, image.len() as u64);

        let mut medium = MemoryMedium::new();
        medium.write_at(0, &image).unwrap();
        let copy = BlockStore::open(Box::new(medium), false, None).unwrap();
        assert!(copy.header.clean);
        assert_eq!(copy.read(a).unwrap(), b"copied");
    }

    #[test]
    fn test_copy_image_carries_free_runs() {
        let mut store = memory_store(None);
        let a = store.store(&vec![1u8; 300]).unwrap();
        let b = store.store(b"pinned").unwrap();
        let c = store.store(&vec![2u8; 100]).unwrap();
        let _tail = store.store(b"end").unwrap();
        store.free(a).unwrap();
        store.free(c).unwrap();
        let free = store.free_blocks();

        let mut image = Vec::new();
        let len = store.copy_to(&mut image).unwrap();
        assert_eq!(len, image.len() as u64);
        assert_eq!(image.len() % 64, 0);

        let mut medium = MemoryMedium::new();
        medium.write_at(0, &image).unwrap();
        let mut copy = BlockStore::open(Box::new(medium), true, None).unwrap();
        assert_eq!(copy.free_blocks(), free);
        assert_eq!(copy.read(b).unwrap(), b"pinned");

        // Freed runs are reusable in the copy
        assert_eq!(copy.store(b"reuse").unwrap(), a);
    }

    #[test]
    fn test_flush_pads_medium_to_whole_blocks() {
        let mut store = memory_store(None);
        store.store(b"short").unwrap();
        assert_ne!(store.medium_len() % 64, 0);

        store.flush().unwrap();
        assert_eq!(store.medium_len(), store.header.total_blocks * 64);
    }

    #[test]
    fn test_oversized_extent_is_rejected() {
        let mut store = memory_store(None);
        let blocks = store.header.total_blocks;
        let err = store.alloc(u32::MAX as usize).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert_eq!(store.header.total_blocks, blocks);
    }

    #[test]
    fn test_free_list_kept_only_on_clean_flush() {
        let mut store = memory_store(None);
        let a = store.store(&vec![1u8; 200]).unwrap();
        let _b = store.store(b"pin").unwrap();
        store.free(a).unwrap();

        store.header.clean = false;
        store.flush().unwrap();
        assert!(store.header.free_root.is_null());

        store.header.clean = true;
        store.flush().unwrap();
        assert!(!store.header.free_root.is_null());
    }

    #[test]
    fn test_read_only_store_rejects_writes() {
        let mut store = memory_store(None);
        store.writable = false;
        assert_eq!(store.store(b"x").unwrap_err().kind, ErrorKind::ReadOnlyViolation);
    }
}
