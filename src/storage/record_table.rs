use std::collections::HashSet;
use tracing::{debug, warn};
use crate::compression::compress::CompressionType;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::RecordId;
use crate::storage::block_store::{BlockRef, BlockStore};

/// Bucket heads per page extent. Updating one slot rewrites one page.
pub const BUCKETS_PER_PAGE: u64 = 128;

/// Chained entry: [id u64][next u64][codec u8][payload]
#[derive(Debug, Clone)]
struct Entry {
    id: RecordId,
    next: BlockRef,
    codec: CompressionType,
    body: Vec<u8>,  // Payload as stored (possibly compressed)
}

impl Entry {
    const HEADER: usize = 17;

    fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(Self::HEADER + self.body.len());
        data.extend_from_slice(&self.id.to_le_bytes());
        data.extend_from_slice(&self.next.0.to_le_bytes());
        data.push(self.codec.tag());
        data.extend_from_slice(&self.body);
        data
    }

    fn decode(mut data: Vec<u8>) -> Result<Self> {
        if data.len() < Self::HEADER {
            return Err(Error::corrupt(format!("record entry of {} bytes is truncated", data.len())));
        }
        let id = u64::from_le_bytes(data[0..8].try_into().unwrap_or_default());
        let next = BlockRef(u64::from_le_bytes(data[8..16].try_into().unwrap_or_default()));
        let codec = CompressionType::from_tag(data[16])?;
        let body = data.split_off(Self::HEADER);
        Ok(Entry { id, next, codec, body })
    }

    fn payload(&self) -> Result<Vec<u8>> {
        self.codec.decompress(&self.body)
    }
}

/// Position of an entry inside its chain
struct Located {
    bucket: u64,
    prev: Option<(BlockRef, Entry)>,
    at: BlockRef,
    entry: Entry,
}

/// Hash table from record id to payload, stored in the block store.
///
/// The bucket array is split into pages referenced from a directory extent;
/// the directory is what `Header::table_root` points at. Everything here is
/// addressed by `BlockRef` and resolved through the store passed in.
///
/// Every multi-extent update links new data before unlinking old data. An
/// interrupted overwrite leaves the new entry ahead of the old one in its
/// chain; lookups see the first and `remove` drops both.
pub struct RecordTable {
    buckets: Vec<BlockRef>,   // Cached chain heads
    pages: Vec<BlockRef>,
    directory: BlockRef,
    count: u64,
    load_factor: f64,
    codec: CompressionType,
}

fn mix(id: u64) -> u64 {
    // splitmix64 finalizer; sequential ids spread across buckets
    let mut z = id.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn encode_refs(refs: &[BlockRef]) -> Vec<u8> {
    let mut data = Vec::with_capacity(refs.len() * 8);
    for r in refs {
        data.extend_from_slice(&r.0.to_le_bytes());
    }
    data
}

fn decode_refs(data: &[u8]) -> Result<Vec<BlockRef>> {
    if data.len() % 8 != 0 {
        return Err(Error::corrupt(format!("ref array of {} bytes is misaligned", data.len())));
    }
    Ok(data
        .chunks_exact(8)
        .map(|c| BlockRef(u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])))
        .collect())
}

impl RecordTable {
    pub fn create(
        store: &mut BlockStore,
        initial_buckets: u64,
        load_factor: f64,
        codec: CompressionType,
    ) -> Result<Self> {
        let bucket_count = initial_buckets.div_ceil(BUCKETS_PER_PAGE) * BUCKETS_PER_PAGE;
        let (pages, directory) = Self::write_pages(store, &vec![BlockRef::NULL; bucket_count as usize])?;

        let table = RecordTable {
            buckets: vec![BlockRef::NULL; bucket_count as usize],
            pages,
            directory,
            count: 0,
            load_factor,
            codec,
        };
        table.persist_meta(store)?;
        Ok(table)
    }

    pub fn open(store: &BlockStore, load_factor: f64, codec: CompressionType) -> Result<Self> {
        let directory = store.header.table_root;
        let bucket_count = store.header.bucket_count;
        if directory.is_null() || bucket_count == 0 || bucket_count % BUCKETS_PER_PAGE != 0 {
            return Err(Error::corrupt(format!(
                "record table root {:?} with {} buckets is invalid",
                directory, bucket_count
            )));
        }

        let pages = decode_refs(&store.read(directory)?)?;
        if pages.len() as u64 * BUCKETS_PER_PAGE != bucket_count {
            return Err(Error::corrupt(format!(
                "{} bucket pages do not cover {} buckets",
                pages.len(),
                bucket_count
            )));
        }

        let mut buckets = Vec::with_capacity(bucket_count as usize);
        for page in &pages {
            let slots = decode_refs(&store.read(*page)?)?;
            if slots.len() as u64 != BUCKETS_PER_PAGE {
                return Err(Error::corrupt(format!("bucket page {:?} has {} slots", page, slots.len())));
            }
            buckets.extend(slots);
        }

        Ok(RecordTable {
            buckets,
            pages,
            directory,
            count: store.header.record_count,
            load_factor,
            codec,
        })
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn bucket_count(&self) -> u64 {
        self.buckets.len() as u64
    }

    pub fn set_codec(&mut self, codec: CompressionType) {
        self.codec = codec;
    }

    fn bucket_of(&self, id: RecordId) -> u64 {
        mix(id) % self.buckets.len() as u64
    }

    pub fn get(&self, store: &BlockStore, id: RecordId) -> Result<Option<Vec<u8>>> {
        match self.locate(store, id)? {
            Some(found) => Ok(Some(found.entry.payload()?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, store: &BlockStore, id: RecordId) -> Result<bool> {
        Ok(self.locate(store, id)?.is_some())
    }

    /// Insert or replace. Returns the previous payload.
    pub fn put(&mut self, store: &mut BlockStore, id: RecordId, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        let found = self.locate(store, id)?;
        let old = match &found {
            Some(found) => Some(found.entry.payload()?),
            None => None,
        };

        let head = self.link(store, id, payload)?;
        match found {
            Some(found) => self.unlink_shadowed(store, found, head)?,
            None => self.count += 1,
        }
        self.persist_meta(store)?;

        if self.count as f64 > self.buckets.len() as f64 * self.load_factor {
            match self.rehash(store) {
                Ok(()) => {}
                Err(e) if e.kind == ErrorKind::OutOfSpace => {
                    warn!(error = %e, buckets = self.buckets.len(), "rehash skipped");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(old)
    }

    /// Store a new entry for `id` at the head of its bucket.
    fn link(&mut self, store: &mut BlockStore, id: RecordId, payload: &[u8]) -> Result<(BlockRef, Entry)> {
        let bucket = self.bucket_of(id);
        let entry = Entry {
            id,
            next: self.buckets[bucket as usize],
            codec: self.codec,
            body: self.codec.compress(payload)?,
        };
        let at = store.store(&entry.encode())?;
        self.set_head(store, bucket, at)?;
        Ok((at, entry))
    }

    /// Unlink an entry that `head` was just linked in front of.
    fn unlink_shadowed(&mut self, store: &mut BlockStore, mut found: Located, head: (BlockRef, Entry)) -> Result<()> {
        if found.prev.is_none() {
            found.prev = Some(head);
        }
        self.unlink(store, found)
    }

    pub fn remove(&mut self, store: &mut BlockStore, id: RecordId) -> Result<Option<Vec<u8>>> {
        let mut removed = None;
        // More than one entry only after an interrupted overwrite
        while let Some(found) = self.locate(store, id)? {
            if removed.is_none() {
                removed = Some(found.entry.payload()?);
            }
            self.unlink(store, found)?;
        }

        if removed.is_some() {
            self.count -= 1;
            self.persist_meta(store)?;
        }
        Ok(removed)
    }

    /// Snapshot of every live id, ascending.
    pub fn ids(&self, store: &BlockStore) -> Result<Vec<RecordId>> {
        let mut ids = Vec::with_capacity(self.count as usize);
        for bucket in 0..self.buckets.len() {
            self.walk(store, bucket as u64, |_, entry| {
                ids.push(entry.id);
                Ok(true)
            })?;
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Drop every record, keeping the current bucket count.
    pub fn clear(&mut self, store: &mut BlockStore) -> Result<()> {
        let mut refs = Vec::new();
        for bucket in 0..self.buckets.len() {
            self.walk(store, bucket as u64, |at, _| {
                refs.push(at);
                Ok(true)
            })?;
        }
        for at in refs {
            store.free(at)?;
        }

        let empty = vec![BlockRef::NULL; self.buckets.len()];
        self.replace_pages(store, empty)?;
        self.count = 0;
        self.persist_meta(store)
    }

    fn locate(&self, store: &BlockStore, id: RecordId) -> Result<Option<Located>> {
        let bucket = self.bucket_of(id);
        let mut prev: Option<(BlockRef, Entry)> = None;
        let mut found = None;

        self.walk(store, bucket, |at, entry| {
            if entry.id == id {
                found = Some((at, entry.clone()));
                return Ok(false);
            }
            prev = Some((at, entry.clone()));
            Ok(true)
        })?;

        Ok(found.map(|(at, entry)| Located { bucket, prev, at, entry }))
    }

    /// Visit a chain; the visitor returns false to stop.
    fn walk<F>(&self, store: &BlockStore, bucket: u64, mut visit: F) -> Result<()>
    where
        F: FnMut(BlockRef, &Entry) -> Result<bool>,
    {
        let mut at = self.buckets[bucket as usize];
        let mut steps = 0u64;

        while !at.is_null() {
            steps += 1;
            if steps > store.header.total_blocks {
                return Err(Error::corrupt(format!("cycle detected in bucket {}", bucket)));
            }

            let entry = Entry::decode(store.read(at)?)?;
            if self.bucket_of(entry.id) != bucket {
                return Err(Error::corrupt(format!(
                    "record {} found in bucket {} at {:?}",
                    entry.id, bucket, at
                )));
            }
            if !visit(at, &entry)? {
                break;
            }
            at = entry.next;
        }
        Ok(())
    }

    fn unlink(&mut self, store: &mut BlockStore, found: Located) -> Result<()> {
        match found.prev {
            None => self.set_head(store, found.bucket, found.entry.next)?,
            Some((prev_at, mut prev)) => {
                // Same size as before, so this stays in place
                prev.next = found.entry.next;
                store.write(prev_at, &prev.encode())?;
            }
        }
        store.free(found.at)
    }

    fn set_head(&mut self, store: &mut BlockStore, bucket: u64, head: BlockRef) -> Result<()> {
        self.buckets[bucket as usize] = head;
        let page = (bucket / BUCKETS_PER_PAGE) as usize;
        let start = page * BUCKETS_PER_PAGE as usize;
        let slots = &self.buckets[start..start + BUCKETS_PER_PAGE as usize];
        store.write(self.pages[page], &encode_refs(slots))
    }

    /// Store bucket pages and their directory. Nothing stays allocated on error.
    fn write_pages(store: &mut BlockStore, buckets: &[BlockRef]) -> Result<(Vec<BlockRef>, BlockRef)> {
        let mut pages = Vec::with_capacity(buckets.len() / BUCKETS_PER_PAGE as usize);
        let mut stored = Ok(());
        for chunk in buckets.chunks(BUCKETS_PER_PAGE as usize) {
            match store.store(&encode_refs(chunk)) {
                Ok(page) => pages.push(page),
                Err(e) => {
                    stored = Err(e);
                    break;
                }
            }
        }
        let directory = stored.and_then(|()| store.store(&encode_refs(&pages)));

        match directory {
            Ok(directory) => Ok((pages, directory)),
            Err(e) => {
                for page in pages {
                    store.free(page)?;
                }
                Err(e)
            }
        }
    }

    fn replace_pages(&mut self, store: &mut BlockStore, buckets: Vec<BlockRef>) -> Result<()> {
        let (pages, directory) = Self::write_pages(store, &buckets)?;
        let old_pages = std::mem::replace(&mut self.pages, pages);
        let old_directory = std::mem::replace(&mut self.directory, directory);
        self.buckets = buckets;
        self.persist_meta(store)?;

        for page in old_pages {
            store.free(page)?;
        }
        store.free(old_directory)
    }

    /// Double the bucket array. Entries are copied into the new chains, the
    /// new pages are published, and only then are the originals freed.
    fn rehash(&mut self, store: &mut BlockStore) -> Result<()> {
        let new_count = self.buckets.len() * 2;
        debug!(from = self.buckets.len(), to = new_count, records = self.count, "rehashing record table");

        let mut entries = Vec::with_capacity(self.count as usize);
        let mut originals = Vec::with_capacity(self.count as usize);
        let mut seen = HashSet::with_capacity(self.count as usize);
        for bucket in 0..self.buckets.len() {
            self.walk(store, bucket as u64, |at, entry| {
                originals.push(at);
                // Shadowed duplicates are dropped here
                if seen.insert(entry.id) {
                    entries.push(entry.clone());
                }
                Ok(true)
            })?;
        }

        let mut heads = vec![BlockRef::NULL; new_count];
        let mut copies = Vec::with_capacity(entries.len());
        for mut entry in entries {
            let bucket = (mix(entry.id) % new_count as u64) as usize;
            entry.next = heads[bucket];
            match store.store(&entry.encode()) {
                Ok(at) => {
                    heads[bucket] = at;
                    copies.push(at);
                }
                Err(e) => {
                    for at in copies {
                        store.free(at)?;
                    }
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.replace_pages(store, heads) {
            for at in copies {
                store.free(at)?;
            }
            return Err(e);
        }
        for at in originals {
            store.free(at)?;
        }
        Ok(())
    }

    fn persist_meta(&self, store: &mut BlockStore) -> Result<()> {
        store.header.record_count = self.count;
        store.header.table_root = self.directory;
        store.header.bucket_count = self.buckets.len() as u64;
        store.write_header()
    }
}
