use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use crate::analysis::analyzer::{Analyzer, TermSet};
use crate::core::config::{Config, OpenMode};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::StoreStats;
use crate::core::types::{Record, RecordId, StoreKind};
use crate::index::inverted::InvertedIndex;
use crate::index::term::TermKind;
use crate::search::executor::{RecordSource, SearchExecutor};
use crate::search::mode::SearchMode;
use crate::storage::block_store::BlockStore;
use crate::storage::file_lock::FileLock;
use crate::storage::medium::{FileMedium, Medium, MemoryMedium};
use crate::storage::record_table::RecordTable;

/// Records tokenized per parallel batch during an index rebuild
const REBUILD_BATCH: usize = 1024;

/// Open store shared by the IDB and JDB handles.
///
/// Writes go to the record table first, then the in-memory index is updated
/// with the term diff. The index reaches disk on `sync` and `close`; until
/// then the header stays marked unclean.
pub struct Database {
    path: Option<PathBuf>,
    mode: OpenMode,
    config: Config,
    kind: StoreKind,

    store: BlockStore,
    table: RecordTable,
    index: InvertedIndex,
    analyzer: Analyzer,

    lock: Option<FileLock>,
    needs_repair: bool,
}

impl Database {
    pub fn open(path: &Path, mode: OpenMode, config: Config, kind: StoreKind) -> Result<Self> {
        mode.validate()?;
        config.validate()?;

        if !mode.create && !path.exists() {
            return Err(Error::new(ErrorKind::NotFound, format!("{} does not exist", path.display())));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(mode.writer)
            .create(mode.create)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::new(ErrorKind::NotFound, format!("{}: {}", path.display(), e))
                }
                _ => Error::new(ErrorKind::Io, format!("{}: {}", path.display(), e)),
            })?;

        // Lock before touching any bytes, truncation included
        let lock = if mode.writer && !mode.no_lock {
            Some(FileLock::acquire_writer(path)?)
        } else {
            None
        };

        let medium = FileMedium::new(file)?;
        let fresh = mode.writer && (mode.truncate || medium.len() == 0);

        let mut db = if fresh {
            Self::create_on(Box::new(medium), mode, config, kind)?
        } else {
            Self::attach(Box::new(medium), mode, config, kind)?
        };
        db.path = Some(path.to_path_buf());
        db.lock = lock;
        db.begin_write()?;

        info!(
            path = %path.display(),
            ?kind,
            writer = mode.writer,
            records = db.table.count(),
            "store opened"
        );
        Ok(db)
    }

    /// Writer over process memory. Nothing survives `close`.
    pub fn open_in_memory(config: Config, kind: StoreKind) -> Result<Self> {
        config.validate()?;
        let mut db = Self::create_on(Box::new(MemoryMedium::new()), OpenMode::writer_create(), config, kind)?;
        db.begin_write()?;
        debug!(?kind, "in-memory store opened");
        Ok(db)
    }

    fn create_on(medium: Box<dyn Medium>, mode: OpenMode, config: Config, kind: StoreKind) -> Result<Self> {
        let mut store = BlockStore::create(medium, kind, config.block_size, config.gram_len, config.capacity)?;
        let table = RecordTable::create(&mut store, config.initial_buckets, config.load_factor, config.compression)?;
        let analyzer = Analyzer::from_config(&config, config.gram_len);

        Ok(Database {
            path: None,
            mode,
            config,
            kind,
            store,
            table,
            index: InvertedIndex::new(),
            analyzer,
            lock: None,
            needs_repair: false,
        })
    }

    fn attach(medium: Box<dyn Medium>, mode: OpenMode, config: Config, kind: StoreKind) -> Result<Self> {
        let store = BlockStore::open(medium, mode.writer, config.capacity)?;

        let found = store.header.store_kind()?;
        if found != kind {
            return Err(Error::invalid(format!("file holds a {:?} store, not {:?}", found, kind)));
        }

        let table = RecordTable::open(&store, config.load_factor, config.compression)?;
        let index = InvertedIndex::load(&store)?;
        // Block size and gram length are fixed at creation
        let analyzer = Analyzer::from_config(&config, store.header.gram_len as usize);

        let needs_repair = mode.writer && !store.header.clean;
        if needs_repair {
            warn!(
                generation = store.header.generation,
                last_sync = ?store.header.last_sync(),
                "store was not closed cleanly; search results may be stale until rebuild_index"
            );
        }

        Ok(Database {
            path: None,
            mode,
            config,
            kind,
            store,
            table,
            index,
            analyzer,
            lock: None,
            needs_repair,
        })
    }

    /// Mark the header unclean while this writer is attached.
    fn begin_write(&mut self) -> Result<()> {
        if !self.mode.writer {
            return Ok(());
        }
        self.store.header.clean = false;
        self.store.flush()
    }

    /// Persist the index and mark the file clean.
    pub fn close(mut self) -> Result<()> {
        if self.mode.writer {
            self.index.flush(&mut self.store)?;
            self.store.header.clean = true;
            self.store.flush()?;
        }

        info!(
            path = ?self.path,
            records = self.table.count(),
            "store closed"
        );
        Ok(())
    }

    fn ensure_writer(&self, operation: &str) -> Result<()> {
        if !self.mode.writer {
            return Err(Error::read_only(operation));
        }
        Ok(())
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_writer(&self) -> bool {
        self.mode.writer
    }

    /// Insert or replace a record. Returns the previous fields.
    pub fn put(&mut self, id: RecordId, fields: &[Vec<u8>]) -> Result<Option<Vec<Vec<u8>>>> {
        self.ensure_writer("put")?;

        let blob = self.kind.encode_fields(fields)?;
        let old = match self.table.put(&mut self.store, id, &blob)? {
            Some(old_blob) => Some(self.kind.decode_fields(old_blob)?),
            None => None,
        };

        let new_terms = self.analyzer.terms(fields);
        match &old {
            Some(old_fields) => {
                let old_terms = self.analyzer.terms(old_fields);
                self.index.deindex(id, old_terms.difference(&new_terms));
                self.index.index(id, new_terms.difference(&old_terms));
            }
            None => self.index.index(id, &new_terms),
        }

        self.after_write()?;
        Ok(old)
    }

    pub fn get(&self, id: RecordId) -> Result<Option<Vec<Vec<u8>>>> {
        match self.table.get(&self.store, id)? {
            Some(blob) => Ok(Some(self.kind.decode_fields(blob)?)),
            None => Ok(None),
        }
    }

    /// Remove a record. A miss leaves the store untouched.
    pub fn out(&mut self, id: RecordId) -> Result<Option<Vec<Vec<u8>>>> {
        self.ensure_writer("out")?;

        let fields = match self.table.remove(&mut self.store, id)? {
            Some(blob) => self.kind.decode_fields(blob)?,
            None => return Ok(None),
        };
        self.index.deindex(id, &self.analyzer.terms(&fields));

        self.after_write()?;
        Ok(Some(fields))
    }

    fn after_write(&mut self) -> Result<()> {
        if self.config.sync_on_write {
            self.sync()?;
        }
        Ok(())
    }

    pub fn contains(&self, id: RecordId) -> Result<bool> {
        self.table.contains(&self.store, id)
    }

    pub fn count(&self) -> u64 {
        self.table.count()
    }

    /// Snapshot of live ids, ascending.
    pub fn ids(&self) -> Result<Vec<RecordId>> {
        self.table.ids(&self.store)
    }

    /// Lazy scan over a snapshot of the id set taken now.
    pub fn scan(&self) -> Result<Scan<'_>> {
        Ok(Scan {
            db: self,
            ids: self.ids()?.into_iter(),
        })
    }

    pub fn search(&self, pattern: &[u8], mode: SearchMode, field: Option<usize>) -> Result<Vec<RecordId>> {
        SearchExecutor::new(&self.index, &self.analyzer, self.config.fuzzy_transpositions)
            .execute(self, pattern, mode, field)
    }

    /// Flush the index, free list and header, then fsync.
    pub fn sync(&mut self) -> Result<()> {
        self.ensure_writer("sync")?;
        self.index.flush(&mut self.store)?;
        self.store.flush()?;
        debug!(generation = self.index.generation(), "store synced");
        Ok(())
    }

    /// Remove every record.
    pub fn vanish(&mut self) -> Result<()> {
        self.ensure_writer("vanish")?;
        let removed = self.table.count();
        self.table.clear(&mut self.store)?;
        self.index.clear(&mut self.store)?;
        self.after_write()?;
        info!(removed, "store vanished");
        Ok(())
    }

    /// Write a consistent copy of the store to `dest`.
    pub fn copy(&mut self, dest: &Path) -> Result<()> {
        if self.mode.writer {
            self.sync()?;
        }

        let file = File::create(dest)?;
        let mut out = BufWriter::new(file);
        let bytes = self.store.copy_to(&mut out)?;
        let file = out.into_inner().map_err(|e| Error::from(e.into_error()))?;
        file.sync_all()?;

        info!(dest = %dest.display(), bytes, "store copied");
        Ok(())
    }

    /// Recompute the whole index from the record table.
    pub fn rebuild_index(&mut self) -> Result<()> {
        self.ensure_writer("rebuild_index")?;
        info!(records = self.table.count(), "rebuilding index");

        self.index.clear(&mut self.store)?;
        let ids = self.ids()?;

        let pool = match self.config.rebuild_threads {
            0 => None,
            n => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| Error::new(ErrorKind::Internal, format!("rebuild pool: {}", e)))?,
            ),
        };

        for batch in ids.chunks(REBUILD_BATCH) {
            let extracted = match &pool {
                Some(pool) => pool.install(|| self.extract_terms(batch)),
                None => self.extract_terms(batch),
            }?;
            for (id, terms) in &extracted {
                self.index.index(*id, terms);
            }
            debug!(batch = batch.len(), terms = self.index.term_count(), "rebuild batch indexed");
        }

        self.index.flush(&mut self.store)?;
        self.store.flush()?;
        self.needs_repair = false;
        info!(terms = self.index.term_count(), "index rebuilt");
        Ok(())
    }

    fn extract_terms(&self, ids: &[RecordId]) -> Result<Vec<(RecordId, TermSet)>> {
        let store = &self.store;
        let table = &self.table;
        let analyzer = &self.analyzer;
        let kind = self.kind;

        ids.par_iter()
            .filter_map(|&id| match table.get(store, id) {
                Ok(Some(blob)) => Some(kind.decode_fields(blob).map(|fields| (id, analyzer.terms(&fields)))),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            })
            .collect()
    }

    pub fn needs_repair(&self) -> bool {
        self.needs_repair
    }

    /// Reload state written by another handle since open or the last
    /// refresh. A writer's own state is authoritative, so this is a no-op.
    pub fn refresh(&mut self) -> Result<()> {
        if self.mode.writer {
            return Ok(());
        }

        self.store.refresh()?;
        self.table = RecordTable::open(&self.store, self.config.load_factor, self.config.compression)?;
        if self.store.header.generation != self.index.generation() {
            self.index = InvertedIndex::load(&self.store)?;
        }
        debug!(
            records = self.table.count(),
            generation = self.index.generation(),
            "reader refreshed"
        );
        Ok(())
    }

    pub fn file_size(&self) -> u64 {
        self.store.medium_len()
    }

    pub fn stats(&self) -> StoreStats {
        let header = &self.store.header;
        StoreStats {
            record_count: self.table.count(),
            bucket_count: self.table.bucket_count(),
            term_count: self.index.term_count(),
            gram_terms: self.index.count_kind(TermKind::Gram),
            token_terms: self.index.count_kind(TermKind::Token),
            index_generation: self.index.generation(),
            block_size: self.store.block_size(),
            total_blocks: header.total_blocks,
            free_blocks: self.store.free_blocks(),
            file_size_bytes: self.store.medium_len(),
            writable: self.mode.writer,
            locked: self.lock.is_some(),
            needs_repair: self.needs_repair,
            last_sync: header.last_sync(),
        }
    }
}

impl RecordSource for Database {
    fn ids(&self) -> Result<Vec<RecordId>> {
        Database::ids(self)
    }

    fn contains(&self, id: RecordId) -> Result<bool> {
        Database::contains(self, id)
    }

    fn fields(&self, id: RecordId) -> Result<Option<Vec<Vec<u8>>>> {
        self.get(id)
    }
}

/// Ascending scan over the ids present when it started. Ids removed since
/// are skipped.
pub struct Scan<'a> {
    db: &'a Database,
    ids: std::vec::IntoIter<RecordId>,
}

impl<'a> Iterator for Scan<'a> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        for id in self.ids.by_ref() {
            match self.db.get(id) {
                Ok(Some(fields)) => return Some(Ok(Record::new(id, fields))),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.ids.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db(kind: StoreKind) -> Database {
        Database::open_in_memory(Config::default(), kind).unwrap()
    }

    #[test]
    fn test_rebuild_matches_incremental_index() {
        let mut db = memory_db(StoreKind::Idb);
        for id in 0..300u64 {
            db.put(id, &[format!("item {} colour {}", id, id % 5).into_bytes()]).unwrap();
        }
        for id in (0..300u64).step_by(4) {
            db.put(id, &[format!("replaced {}", id).into_bytes()]).unwrap();
        }
        db.out(1).unwrap();

        let incremental = db.stats();
        let before = db.search(b"colour 3", SearchMode::Substr, None).unwrap();

        db.config.rebuild_threads = 2;
        db.rebuild_index().unwrap();
        let rebuilt = db.stats();

        assert_eq!(incremental.term_count, rebuilt.term_count);
        assert_eq!(incremental.gram_terms, rebuilt.gram_terms);
        assert_eq!(before, db.search(b"colour 3", SearchMode::Substr, None).unwrap());
        assert!(rebuilt.index_generation > incremental.index_generation);
    }

    #[test]
    fn test_idb_rejects_multiple_fields() {
        let mut db = memory_db(StoreKind::Idb);
        let err = db.put(1, &[b"a".to_vec(), b"b".to_vec()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(db.count(), 0);
    }

    #[test]
    fn test_scan_skips_removed_ids() {
        let mut db = memory_db(StoreKind::Jdb);
        for id in 1..=5u64 {
            db.put(id, &[id.to_string().into_bytes()]).unwrap();
        }

        let mut scan = db.scan().unwrap();
        let first = scan.next().unwrap().unwrap();
        assert_eq!(first.id, 1);
        drop(scan);

        db.out(3).unwrap();
        let ids: Vec<RecordId> = db.scan().unwrap().map(|r| r.unwrap().id).collect();
        assert_eq!(ids, vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_sync_bumps_generation_only_when_dirty() {
        let mut db = memory_db(StoreKind::Idb);
        db.put(1, &[b"payload".to_vec()]).unwrap();
        db.sync().unwrap();
        let generation = db.stats().index_generation;

        db.sync().unwrap();
        assert_eq!(db.stats().index_generation, generation);

        db.put(2, &[b"another".to_vec()]).unwrap();
        db.sync().unwrap();
        assert_eq!(db.stats().index_generation, generation + 1);
        assert!(db.stats().last_sync.is_some());
    }
}
