//! Recovery test for tpckv: crash and restart a replica's log

use std::fs::OpenOptions;
use std::io::Write;
use tempfile::TempDir;
use tpckv::common::{KvStore, MemStore};
use tpckv::replica::{LogRecord, RecoveryLog};

#[test]
fn test_recovery_after_crash() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("replica.log");

    // Six committed writes, then a prepared write with no decision
    {
        let mut log = RecoveryLog::open(&log_path, &MemStore::new()).unwrap();
        for i in 0..6 {
            let key = format!("key{}", i);
            log.prepare(LogRecord::Put {
                key: key.clone(),
                value: format!("value{}", i),
            })
            .unwrap();
            log.commit(&key).unwrap();
        }
        log.prepare(LogRecord::Put {
            key: "key_crash".into(),
            value: "value_crash".into(),
        })
        .unwrap();
    }

    // Simulate crash (drop log) and rebuild into an empty store
    let store = MemStore::new();
    let log = RecoveryLog::open(&log_path, &store).unwrap();

    assert_eq!(store.len(), 6);
    for i in 0..6 {
        assert_eq!(
            store.get(&format!("key{}", i)).unwrap(),
            Some(format!("value{}", i))
        );
    }
    assert_eq!(store.get("key_crash").unwrap(), None);
    assert_eq!(log.in_doubt(), 1);
}

#[test]
fn test_abort_and_delete_replay() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("replica.log");

    {
        let mut log = RecoveryLog::open(&log_path, &MemStore::new()).unwrap();
        log.prepare(LogRecord::Put {
            key: "a".into(),
            value: "1".into(),
        })
        .unwrap();
        log.commit("a").unwrap();
        log.prepare(LogRecord::Put {
            key: "a".into(),
            value: "2".into(),
        })
        .unwrap();
        log.abort("a").unwrap();
        log.prepare(LogRecord::Put {
            key: "b".into(),
            value: "3".into(),
        })
        .unwrap();
        log.commit("b").unwrap();
        log.prepare(LogRecord::Del { key: "b".into() }).unwrap();
        log.commit("b").unwrap();
    }

    let store = MemStore::new();
    RecoveryLog::open(&log_path, &store).unwrap();
    assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
    assert_eq!(store.get("b").unwrap(), None);
}

#[test]
fn test_recovery_is_repeatable() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("replica.log");

    {
        let mut log = RecoveryLog::open(&log_path, &MemStore::new()).unwrap();
        log.prepare(LogRecord::Put {
            key: "k".into(),
            value: "v".into(),
        })
        .unwrap();
        log.commit("k").unwrap();
    }

    for _ in 0..3 {
        let store = MemStore::new();
        let log = RecoveryLog::open(&log_path, &store).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        assert_eq!(
            log.last_entry(),
            Some(&LogRecord::Commit { key: "k".into() })
        );
    }
}

#[test]
fn test_recovery_after_torn_write() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("replica.log");

    {
        let mut log = RecoveryLog::open(&log_path, &MemStore::new()).unwrap();
        log.prepare(LogRecord::Put {
            key: "k".into(),
            value: "v".into(),
        })
        .unwrap();
        log.commit("k").unwrap();
    }

    // Half-written record at the tail
    {
        let mut f = OpenOptions::new().append(true).open(&log_path).unwrap();
        f.write_all(b"TPC1\x07\x00\x00").unwrap();
    }

    let store = MemStore::new();
    RecoveryLog::open(&log_path, &store).unwrap();
    assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
}
