use dystopia::{CompressionType, Config, ErrorKind, OpenMode, SearchMode, TokenizerKind, IDB};
use tempfile::TempDir;

fn open_writer(dir: &TempDir, name: &str) -> IDB {
    let mut idb = IDB::new();
    idb.open(dir.path().join(name), OpenMode::writer_create()).unwrap();
    idb
}

#[test]
fn test_hello_world_scenario() {
    let dir = TempDir::new().unwrap();
    let mut idb = open_writer(&dir, "casket.idb");

    idb.put(1234, b"hello world").unwrap();
    idb.put(1235, b"goodbye world").unwrap();
    assert_eq!(idb.count().unwrap(), 2);
    assert_eq!(idb.search(b"world", SearchMode::Substr).unwrap(), vec![1234, 1235]);

    assert_eq!(idb.out(1234).unwrap(), Some(b"hello world".to_vec()));
    assert_eq!(idb.get(1234).unwrap(), None);
    assert_eq!(idb.count().unwrap(), 1);
    assert_eq!(idb.search(b"world", SearchMode::Substr).unwrap(), vec![1235]);

    idb.close().unwrap();
}

#[test]
fn test_last_writer_wins() {
    let mut idb = IDB::new();
    idb.open_in_memory().unwrap();

    assert_eq!(idb.put(7, b"first").unwrap(), None);
    assert_eq!(idb.put(7, b"second").unwrap(), Some(b"first".to_vec()));
    assert_eq!(idb.get(7).unwrap(), Some(b"second".to_vec()));
    assert_eq!(idb.count().unwrap(), 1);

    // The replaced payload must not linger in the index
    assert!(idb.search(b"first", SearchMode::Substr).unwrap().is_empty());
    assert!(idb.search(b"first", SearchMode::Token).unwrap().is_empty());
    assert_eq!(idb.search(b"second", SearchMode::Token).unwrap(), vec![7]);
}

#[test]
fn test_empty_payload_round_trip() {
    let mut idb = IDB::new();
    idb.open_in_memory().unwrap();

    idb.put(1, b"").unwrap();
    assert_eq!(idb.get(1).unwrap(), Some(Vec::new()));
    assert!(idb.contains(1).unwrap());
    assert_eq!(idb.out(1).unwrap(), Some(Vec::new()));
    assert!(!idb.contains(1).unwrap());
}

#[test]
fn test_out_missing_is_a_noop() {
    let mut idb = IDB::new();
    idb.open_in_memory().unwrap();
    idb.put(1, b"keep me").unwrap();

    let before = idb.stats().unwrap();
    assert_eq!(idb.out(99).unwrap(), None);
    assert_eq!(idb.out(1).unwrap(), Some(b"keep me".to_vec()));
    assert_eq!(idb.out(1).unwrap(), None);
    assert_eq!(idb.count().unwrap(), 0);
    assert_eq!(before.record_count, 1);
}

#[test]
fn test_substr_matches_brute_force() {
    let words = ["apple", "banana", "cherry", "date", "elder", "fig", "grape"];
    let mut idb = IDB::new();
    idb.open_in_memory().unwrap();

    let mut payloads = Vec::new();
    for id in 0..200u64 {
        let text = format!(
            "{} {} {}",
            words[(id % 7) as usize],
            words[((id / 7) % 7) as usize],
            id
        );
        idb.put(id, text.as_bytes()).unwrap();
        payloads.push((id, text));
    }
    // Mutate part of the set so the index has to follow
    for id in (0..200u64).step_by(5) {
        idb.out(id).unwrap();
        payloads.retain(|(i, _)| *i != id);
    }

    for pattern in ["an", "e", "rry dat", "ape 1", "fig fig", "zzz"] {
        let expected: Vec<u64> = payloads
            .iter()
            .filter(|(_, text)| text.contains(pattern))
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(
            idb.search(pattern.as_bytes(), SearchMode::Substr).unwrap(),
            expected,
            "pattern {:?}",
            pattern
        );
    }
}

#[test]
fn test_every_search_mode() {
    let mut idb = IDB::new();
    idb.open_in_memory().unwrap();
    idb.put(1, b"The quick brown fox").unwrap();
    idb.put(2, b"quick silver").unwrap();
    idb.put(3, b"brown").unwrap();
    idb.put(4, b"foxtrot uniform").unwrap();

    assert_eq!(idb.search(b"brown", SearchMode::Exact).unwrap(), vec![3]);
    assert_eq!(idb.search(b"quick", SearchMode::Prefix).unwrap(), vec![2]);
    assert_eq!(idb.search(b"fox", SearchMode::Suffix).unwrap(), vec![1]);
    assert_eq!(idb.search(b"fox", SearchMode::Substr).unwrap(), vec![1, 4]);
    assert_eq!(idb.search(b"QUICK", SearchMode::Token).unwrap(), vec![1, 2]);
    assert_eq!(idb.search(b"fox", SearchMode::TokenPrefix).unwrap(), vec![1, 4]);
    assert_eq!(idb.search(b"rot", SearchMode::TokenSuffix).unwrap(), vec![4]);
    assert_eq!(idb.search(b"qiuck", SearchMode::Fuzzy { max_distance: 1 }).unwrap(), vec![1, 2]);
    assert_eq!(idb.search(b"brwn", SearchMode::FuzzyExact { max_distance: 1 }).unwrap(), vec![3]);
}

#[test]
fn test_invalid_search_arguments() {
    let mut idb = IDB::new();
    idb.open_in_memory().unwrap();
    idb.put(1, b"anything").unwrap();

    let err = idb.search(b"", SearchMode::Substr).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = idb.search(b"any", SearchMode::Fuzzy { max_distance: 5 }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_iteration_is_ascending() {
    let mut idb = IDB::new();
    idb.open_in_memory().unwrap();
    for id in [50u64, 3, 17, 1000, 9] {
        idb.put(id, format!("v{}", id).as_bytes()).unwrap();
    }

    let ids: Vec<u64> = idb.iter().map(|r| r.unwrap().0).collect();
    assert_eq!(ids, vec![3, 9, 17, 50, 1000]);

    let mut seen = 0;
    for record in &idb {
        let (id, payload) = record.unwrap();
        assert_eq!(payload, format!("v{}", id).into_bytes());
        seen += 1;
    }
    assert_eq!(seen, 5);
}

#[test]
fn test_closed_handle_errors() {
    let mut idb = IDB::new();
    assert_eq!(idb.get(1).unwrap_err().kind(), ErrorKind::NotOpen);
    assert_eq!(idb.put(1, b"x").unwrap_err().kind(), ErrorKind::NotOpen);
    assert_eq!(idb.close().unwrap_err().kind(), ErrorKind::NotOpen);
    assert_eq!(idb.count().unwrap_err().kind(), ErrorKind::NotOpen);

    let mut iter = idb.iter();
    assert_eq!(iter.next().unwrap().unwrap_err().kind(), ErrorKind::NotOpen);
    assert!(iter.next().is_none());
}

#[test]
fn test_open_errors() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.idb");

    let mut idb = IDB::new();
    assert_eq!(idb.open(&path, OpenMode::writer()).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(idb.open(&path, OpenMode::reader()).unwrap_err().kind(), ErrorKind::NotFound);

    let bad_mode = OpenMode { create: true, ..OpenMode::reader() };
    assert_eq!(idb.open(&path, bad_mode).unwrap_err().kind(), ErrorKind::InvalidArgument);

    idb.open(&path, OpenMode::writer_create()).unwrap();
    assert_eq!(
        idb.open(&path, OpenMode::writer_create()).unwrap_err().kind(),
        ErrorKind::AlreadyOpen
    );
    idb.close().unwrap();
}

#[test]
fn test_reader_cannot_write() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ro.idb");
    let mut writer = open_writer(&dir, "ro.idb");
    writer.put(1, b"data").unwrap();
    writer.close().unwrap();

    let mut reader = IDB::new();
    reader.open(&path, OpenMode::reader()).unwrap();
    assert_eq!(reader.get(1).unwrap(), Some(b"data".to_vec()));
    assert_eq!(reader.put(2, b"x").unwrap_err().kind(), ErrorKind::ReadOnlyViolation);
    assert_eq!(reader.out(1).unwrap_err().kind(), ErrorKind::ReadOnlyViolation);
    assert_eq!(reader.sync().unwrap_err().kind(), ErrorKind::ReadOnlyViolation);
    assert_eq!(reader.vanish().unwrap_err().kind(), ErrorKind::ReadOnlyViolation);
    reader.close().unwrap();
}

#[test]
fn test_fixed_capacity_runs_out() {
    let config = Config {
        capacity: Some(64 * 1024),
        initial_buckets: 128,
        ..Config::default()
    };
    let mut idb = IDB::with_config(config);
    idb.open_in_memory().unwrap();

    let payload = vec![b'x'; 1000];
    let mut result = Ok(None);
    for id in 0..1000u64 {
        result = idb.put(id, &payload);
        if result.is_err() {
            break;
        }
    }
    assert_eq!(result.unwrap_err().kind(), ErrorKind::OutOfSpace);
}

#[test]
fn test_vanish() {
    let mut idb = IDB::new();
    idb.open_in_memory().unwrap();
    for id in 0..50u64 {
        idb.put(id, b"some words here").unwrap();
    }
    idb.vanish().unwrap();

    assert_eq!(idb.count().unwrap(), 0);
    assert!(idb.search(b"words", SearchMode::Token).unwrap().is_empty());
    assert!(idb.search(b"words", SearchMode::Substr).unwrap().is_empty());

    idb.put(1, b"fresh start").unwrap();
    assert_eq!(idb.search(b"fresh", SearchMode::Token).unwrap(), vec![1]);
}

#[test]
fn test_compressed_payloads() {
    for codec in [CompressionType::LZ4, CompressionType::Zstd, CompressionType::Snappy] {
        let config = Config { compression: codec, ..Config::default() };
        let mut idb = IDB::with_config(config);
        idb.open_in_memory().unwrap();

        let text = "compressible ".repeat(100);
        idb.put(1, text.as_bytes()).unwrap();
        assert_eq!(idb.get(1).unwrap(), Some(text.clone().into_bytes()), "{:?}", codec);
        assert_eq!(idb.search(b"compressible", SearchMode::Token).unwrap(), vec![1]);
    }
}

#[test]
fn test_many_records_trigger_rehash() {
    let config = Config { initial_buckets: 128, load_factor: 1.0, ..Config::default() };
    let mut idb = IDB::with_config(config);
    idb.open_in_memory().unwrap();

    for id in 0..1000u64 {
        idb.put(id, format!("record number {}", id).as_bytes()).unwrap();
    }
    let stats = idb.stats().unwrap();
    assert!(stats.bucket_count >= 1024);
    assert_eq!(stats.record_count, 1000);
    assert_eq!(idb.get(777).unwrap(), Some(b"record number 777".to_vec()));
    assert_eq!(idb.search(b"777", SearchMode::Token).unwrap(), vec![777]);
}

#[test]
fn test_sync_on_write_is_visible_to_readers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("eager.idb");
    let config = Config { sync_on_write: true, ..Config::default() };

    let mut writer = IDB::with_config(config);
    writer.open(&path, OpenMode::writer_create()).unwrap();
    writer.put(1, b"flushed straight away").unwrap();
    writer.put(2, b"and so was this").unwrap();
    writer.out(2).unwrap();

    // No explicit sync or close before the reader opens
    let mut reader = IDB::new();
    reader.open(&path, OpenMode::reader()).unwrap();
    assert_eq!(reader.count().unwrap(), 1);
    assert_eq!(reader.get(1).unwrap(), Some(b"flushed straight away".to_vec()));
    assert_eq!(reader.search(b"straight", SearchMode::Token).unwrap(), vec![1]);
    assert!(reader.search(b"this", SearchMode::Token).unwrap().is_empty());

    writer.close().unwrap();
}

#[test]
fn test_unicode_tokenizer_with_extra_separators() {
    let config = Config {
        tokenizer: TokenizerKind::Unicode,
        extra_separators: vec![b'_'],
        ..Config::default()
    };
    let mut idb = IDB::with_config(config);
    idb.open_in_memory().unwrap();

    idb.put(1, "Größe des_Straßennetzes".as_bytes()).unwrap();
    idb.put(2, b"plain words").unwrap();

    assert_eq!(idb.search("größe".as_bytes(), SearchMode::Token).unwrap(), vec![1]);
    assert_eq!(idb.search(b"des", SearchMode::Token).unwrap(), vec![1]);
    assert_eq!(idb.search("straßen".as_bytes(), SearchMode::TokenPrefix).unwrap(), vec![1]);
    assert!(idb.search("des_straßennetzes".as_bytes(), SearchMode::Token).unwrap().is_empty());
    assert_eq!(idb.search(b"words", SearchMode::Token).unwrap(), vec![2]);
}
