//! End-to-end tests over the public API: ordering, anchored resume,
//! archive rollover, signed export/import, and crash recovery.

use std::io::{Read, Write};
use std::sync::Arc;
use tempfile::tempdir;
use txnlog_core::{
    Config, LineTag, LogError, LogResult, Middleware, MiddlewareChain, PayloadWriter, TxnId,
    TxnLog,
};
use txnlog_storage::MemoryBackend;

type Record = (LineTag, Vec<u8>, Vec<u8>);

fn records(log: &TxnLog, tid: Option<&TxnId>) -> Vec<Record> {
    let mut out = Vec::new();
    log.for_each(tid, true, |tag, k, v| {
        out.push((tag, k.to_vec(), v.to_vec()));
        Ok(true)
    })
    .unwrap();
    out
}

fn txn_ids(log: &TxnLog, tid: Option<&TxnId>) -> Vec<TxnId> {
    let mut out = Vec::new();
    log.for_each_txn(tid, true, |info| {
        out.push(info.id.parse().unwrap());
        Ok(true)
    })
    .unwrap();
    out
}

fn action_counts(log: &TxnLog, tid: Option<&TxnId>) -> Vec<usize> {
    let mut out = Vec::new();
    log.for_each_txn(tid, true, |info| {
        out.push(info.actions.len());
        Ok(true)
    })
    .unwrap();
    out
}

fn raw_bytes(log: &TxnLog) -> Vec<u8> {
    let mut out = Vec::new();
    log.for_each_raw(None, true, |line| {
        out.extend_from_slice(line);
        out.push(b'\n');
        Ok(true)
    })
    .unwrap();
    out
}

/// Seeds the canonical starting state: two transactions, three puts.
fn seed_basic(log: &TxnLog) -> (TxnId, TxnId) {
    log.txn(|txn| {
        txn.put(b"greeting", b"hello")?;
        txn.put(b"name", b"world")
    })
    .unwrap();
    log.txn(|txn| txn.put(b"name", b"John Doe")).unwrap();

    let ids = txn_ids(log, None);
    assert_eq!(ids.len(), 2);
    (ids[0], ids[1])
}

fn snapshot_current_state(txn: &mut txnlog_core::Txn<'_>) -> LogResult<()> {
    txn.put(b"greeting", b"hello")?;
    txn.put(b"name", b"John Doe")
}

#[test]
fn basic_ordering() {
    let dir = tempdir().unwrap();
    let log = TxnLog::open(dir.path(), "testing").unwrap();
    seed_basic(&log);

    let got = records(&log, None);
    assert_eq!(
        got,
        vec![
            (LineTag::Put, b"greeting".to_vec(), b"hello".to_vec()),
            (LineTag::Put, b"name".to_vec(), b"world".to_vec()),
            (LineTag::Put, b"name".to_vec(), b"John Doe".to_vec()),
        ]
    );

    assert_eq!(action_counts(&log, None), vec![2, 1]);
}

#[test]
fn resume_from_anchor() {
    let dir = tempdir().unwrap();
    let log = TxnLog::open(dir.path(), "testing").unwrap();
    let (t1, t2) = seed_basic(&log);

    // Everything after t1 is exactly t2's single record.
    assert_eq!(
        records(&log, Some(&t1)),
        vec![(LineTag::Put, b"name".to_vec(), b"John Doe".to_vec())]
    );

    // Anchoring at the last transaction yields nothing.
    assert!(records(&log, Some(&t2)).is_empty());
    assert_eq!(log.last_txn().unwrap(), t2);
}

#[test]
fn archive_and_resume() {
    let dir = tempdir().unwrap();
    let log = TxnLog::open(dir.path(), "testing").unwrap();
    let (t1, t2) = seed_basic(&log);

    log.archive(snapshot_current_state).unwrap();

    // The archive still supplies history after t1.
    assert_eq!(
        records(&log, Some(&t1)),
        vec![(LineTag::Put, b"name".to_vec(), b"John Doe".to_vec())]
    );

    // An unanchored replay delivers the snapshot re-expression only.
    assert_eq!(
        records(&log, None),
        vec![
            (LineTag::Put, b"greeting".to_vec(), b"hello".to_vec()),
            (LineTag::Put, b"name".to_vec(), b"John Doe".to_vec()),
        ]
    );
    assert_eq!(action_counts(&log, None), vec![2]);

    // The replay marker carries the pre-archive last id.
    assert_eq!(log.last_txn().unwrap(), t2);
    assert_eq!(txn_ids(&log, None), vec![t2]);
}

#[test]
fn archive_preserves_anchored_history() {
    let dir = tempdir().unwrap();
    let log = TxnLog::open(dir.path(), "testing").unwrap();
    let (t1, _) = seed_basic(&log);

    let before = txn_ids(&log, Some(&t1));
    log.archive(snapshot_current_state).unwrap();
    let after = txn_ids(&log, Some(&t1));

    assert_eq!(before, after);
}

#[test]
fn export_import_fresh_log() {
    let dir_a = tempdir().unwrap();
    let a = TxnLog::open(dir_a.path(), "testing").unwrap();
    let (_, t2) = seed_basic(&a);
    a.archive(snapshot_current_state).unwrap();

    let mut buf = Vec::new();
    a.export(None, &mut buf).unwrap();

    let dir_b = tempdir().unwrap();
    let b = TxnLog::open(dir_b.path(), "testing").unwrap();
    let last = b.import(buf.as_slice(), |_, _, _| Ok(true)).unwrap();
    assert_eq!(last, Some(t2));
    assert_eq!(b.last_txn().unwrap(), t2);

    // The fresh log replays the same logical state as the source.
    assert_eq!(records(&b, None), records(&a, None));
}

#[test]
fn export_import_delta() {
    let dir_a = tempdir().unwrap();
    let a = TxnLog::open(dir_a.path(), "testing").unwrap();
    seed_basic(&a);
    a.archive(snapshot_current_state).unwrap();

    let mut buf = Vec::new();
    a.export(None, &mut buf).unwrap();

    let dir_b = tempdir().unwrap();
    let b = TxnLog::open(dir_b.path(), "testing").unwrap();
    let last = b.import(buf.as_slice(), |_, _, _| Ok(true)).unwrap().unwrap();

    // New history on A ships incrementally to B.
    a.txn(|txn| txn.put(b"name", b"foo")).unwrap();
    let t3 = a.last_txn().unwrap();

    let mut delta = Vec::new();
    a.export(Some(&last), &mut delta).unwrap();

    let mut imported = Vec::new();
    let got = b
        .import(delta.as_slice(), |tag, k, v| {
            imported.push((tag, k.to_vec(), v.to_vec()));
            Ok(true)
        })
        .unwrap();
    assert_eq!(got, Some(t3));
    assert_eq!(
        imported,
        vec![(LineTag::Put, b"name".to_vec(), b"foo".to_vec())]
    );

    assert_eq!(
        records(&b, None),
        vec![
            (LineTag::Put, b"greeting".to_vec(), b"hello".to_vec()),
            (LineTag::Put, b"name".to_vec(), b"John Doe".to_vec()),
            (LineTag::Put, b"name".to_vec(), b"foo".to_vec()),
        ]
    );
    assert_eq!(records(&b, None), records(&a, None));
}

#[test]
fn corrupted_export_is_rejected() {
    let dir_a = tempdir().unwrap();
    let a = TxnLog::open(dir_a.path(), "testing").unwrap();
    seed_basic(&a);

    let dir_b = tempdir().unwrap();
    let b = TxnLog::open(dir_b.path(), "testing").unwrap();
    b.txn(|txn| txn.put(b"existing", b"state")).unwrap();
    let untouched = raw_bytes(&b);

    let mut buf = Vec::new();
    a.export(None, &mut buf).unwrap();

    // Flipping any byte of the stream must fail verification and leave
    // the target byte-for-byte unchanged.
    for idx in [0, buf.len() / 2, buf.len() - 1] {
        let mut bad = buf.clone();
        bad[idx] ^= 0x01;
        let err = b.import(bad.as_slice(), |_, _, _| Ok(true));
        assert!(matches!(err, Err(LogError::MacMismatch)), "flip at {idx}");
        assert_eq!(raw_bytes(&b), untouched);
    }

    // The pristine stream still imports afterwards.
    b.import(buf.as_slice(), |_, _, _| Ok(true)).unwrap();
}

#[test]
fn export_at_head_and_unknown_anchor_fail() {
    let dir = tempdir().unwrap();
    let log = TxnLog::open(dir.path(), "testing").unwrap();
    let (_, t2) = seed_basic(&log);

    let mut buf = Vec::new();
    assert!(matches!(
        log.export(Some(&t2), &mut buf),
        Err(LogError::NoTxn)
    ));

    // An id this log never minted matches nothing in either file.
    let stranger = txnlog_core::TxnIdGen::new().next();
    assert!(matches!(
        log.export(Some(&stranger), &mut buf),
        Err(LogError::InvalidTxn { .. })
    ));
}

#[test]
fn incremental_rounds_converge() {
    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    let a = TxnLog::open(dir_a.path(), "testing").unwrap();
    let b = TxnLog::open(dir_b.path(), "testing").unwrap();

    seed_basic(&a);
    let mut buf = Vec::new();
    a.export(None, &mut buf).unwrap();
    let mut last = b.import(buf.as_slice(), |_, _, _| Ok(true)).unwrap().unwrap();

    for round in 0u8..4 {
        a.txn(|txn| {
            txn.put(format!("key-{round}").as_bytes(), &[round])?;
            txn.delete(b"name")
        })
        .unwrap();

        let mut delta = Vec::new();
        a.export(Some(&last), &mut delta).unwrap();
        last = b.import(delta.as_slice(), |_, _, _| Ok(true)).unwrap().unwrap();
        assert_eq!(last, a.last_txn().unwrap());
    }

    assert_eq!(records(&a, None), records(&b, None));
    assert_eq!(txn_ids(&a, None), txn_ids(&b, None));
}

#[test]
fn reopen_recovers_state() {
    let dir = tempdir().unwrap();
    let (t2, expected) = {
        let log = TxnLog::open(dir.path(), "testing").unwrap();
        let (_, t2) = seed_basic(&log);
        let expected = records(&log, None);
        log.close().unwrap();
        (t2, expected)
    };

    let log = TxnLog::open(dir.path(), "testing").unwrap();
    assert_eq!(log.last_txn().unwrap(), t2);
    assert_eq!(records(&log, None), expected);

    // New ids keep ordering after the recovered head.
    log.txn(|txn| txn.put(b"post", b"reopen")).unwrap();
    let t3 = log.last_txn().unwrap();
    assert!(t3.order_key().unwrap() > t2.order_key().unwrap());
}

#[test]
fn reopen_after_archive_keeps_replay_id() {
    let dir = tempdir().unwrap();
    let t2 = {
        let log = TxnLog::open(dir.path(), "testing").unwrap();
        let (_, t2) = seed_basic(&log);
        log.archive(snapshot_current_state).unwrap();
        t2
    };

    let log = TxnLog::open(dir.path(), "testing").unwrap();
    assert_eq!(log.last_txn().unwrap(), t2);
    assert_eq!(action_counts(&log, None), vec![2]);
}

#[test]
fn second_open_is_locked_out() {
    let dir = tempdir().unwrap();
    let held = TxnLog::open(dir.path(), "testing").unwrap();

    assert!(matches!(
        TxnLog::open(dir.path(), "testing"),
        Err(LogError::Locked { .. })
    ));

    drop(held);
    assert!(TxnLog::open(dir.path(), "testing").is_ok());
}

#[test]
fn crash_between_archive_append_and_truncate_trusts_active() {
    // Build a log, then reconstruct the on-disk state of a crash that
    // happened after the archive copy was synced but before the active
    // file was truncated: both files hold the same bytes.
    let source = TxnLog::with_backends(
        "testing",
        Box::new(MemoryBackend::new()),
        Box::new(MemoryBackend::new()),
        Config::default(),
        MiddlewareChain::new(),
    )
    .unwrap();
    let (t1, t2) = seed_basic(&source);
    let bytes = raw_bytes(&source);

    let recovered = TxnLog::with_backends(
        "testing",
        Box::new(MemoryBackend::with_data(bytes.clone())),
        Box::new(MemoryBackend::with_data(bytes)),
        Config::default(),
        MiddlewareChain::new(),
    )
    .unwrap();

    // The active file is authoritative: history reads exactly as before
    // the interrupted archive.
    assert_eq!(recovered.last_txn().unwrap(), t2);
    assert_eq!(records(&recovered, None).len(), 3);
    assert_eq!(
        records(&recovered, Some(&t1)),
        vec![(LineTag::Put, b"name".to_vec(), b"John Doe".to_vec())]
    );

    // Redoing the archive leaves a consistent log.
    recovered.archive(snapshot_current_state).unwrap();
    assert_eq!(records(&recovered, None).len(), 2);
    assert_eq!(recovered.last_txn().unwrap(), t2);
}

#[test]
fn concurrent_readers_during_writes() {
    let dir = tempdir().unwrap();
    let log = Arc::new(TxnLog::open(dir.path(), "testing").unwrap());
    log.txn(|txn| txn.put(b"seed", b"0")).unwrap();

    let mut readers = Vec::new();
    for _ in 0..4 {
        let log = Arc::clone(&log);
        readers.push(std::thread::spawn(move || {
            for _ in 0..50 {
                let mut prev = Vec::new();
                log.for_each(None, true, |_, k, _| {
                    prev.push(k.to_vec());
                    Ok(true)
                })
                .unwrap();
                // Writes are append-only, so a reader never sees less
                // than the seed record.
                assert!(!prev.is_empty());
            }
        }));
    }

    for i in 0u8..50 {
        log.txn(|txn| txn.put(&[i], &[i])).unwrap();
    }

    for handle in readers {
        handle.join().unwrap();
    }

    assert_eq!(records(&log, None).len(), 51);
}

// ---------------------------------------------------------------------------
// Middleware through the public trait surface
// ---------------------------------------------------------------------------

/// Hex-armors payloads: a visible transform whose output never collides
/// with the line terminator.
struct HexArmor;

struct HexArmorWriter<'a> {
    sink: Box<dyn PayloadWriter + 'a>,
}

impl Write for HexArmorWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for b in buf {
            self.sink.write_all(format!("{b:02x}").as_bytes())?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.sink.flush()
    }
}

impl PayloadWriter for HexArmorWriter<'_> {
    fn finish(self: Box<Self>) -> LogResult<()> {
        self.sink.finish()
    }
}

impl Middleware for HexArmor {
    fn name(&self) -> &'static str {
        "hexarmor"
    }

    fn writer<'a>(
        &self,
        sink: Box<dyn PayloadWriter + 'a>,
    ) -> LogResult<Box<dyn PayloadWriter + 'a>> {
        Ok(Box::new(HexArmorWriter { sink }))
    }

    fn reader<'a>(&self, mut source: Box<dyn Read + 'a>) -> LogResult<Box<dyn Read + 'a>> {
        let mut armored = Vec::new();
        source.read_to_end(&mut armored)?;

        let mut plain = Vec::with_capacity(armored.len() / 2);
        for pair in armored.chunks(2) {
            let digits = std::str::from_utf8(pair)
                .map_err(|e| LogError::middleware(e.to_string()))?;
            plain.push(
                u8::from_str_radix(digits, 16).map_err(|e| LogError::middleware(e.to_string()))?,
            );
        }
        Ok(Box::new(std::io::Cursor::new(plain)))
    }
}

fn armored_chain() -> MiddlewareChain {
    MiddlewareChain::new().with(Box::new(HexArmor))
}

#[test]
fn middleware_applies_to_data_lines_only() {
    let dir = tempdir().unwrap();
    let log = TxnLog::open_with(dir.path(), "testing", Config::default(), armored_chain()).unwrap();
    seed_basic(&log);

    // Decoded iteration sees plaintext.
    assert_eq!(
        records(&log, None)[0],
        (LineTag::Put, b"greeting".to_vec(), b"hello".to_vec())
    );

    // Raw data payloads are armored, transaction lines are not.
    log.for_each_raw(None, true, |line| {
        let tag = LineTag::from_byte(line[0]).unwrap();
        let contains_plain = line.windows(5).any(|w| w == b"hello");
        match tag {
            LineTag::Put => assert!(!contains_plain, "payload leaked through middleware"),
            LineTag::Transaction => {
                // The id is stored as a readable UUID string.
                assert!(line[1..].iter().any(|&b| b == b'-'));
            }
            _ => {}
        }
        Ok(true)
    })
    .unwrap();

    // Archive and replay keep working through the armor.
    log.archive(snapshot_current_state).unwrap();
    assert_eq!(
        records(&log, None),
        vec![
            (LineTag::Put, b"greeting".to_vec(), b"hello".to_vec()),
            (LineTag::Put, b"name".to_vec(), b"John Doe".to_vec()),
        ]
    );
}

#[test]
fn export_token_binds_middleware_stack() {
    let dir_a = tempdir().unwrap();
    let a = TxnLog::open_with(dir_a.path(), "testing", Config::default(), armored_chain()).unwrap();
    seed_basic(&a);

    let mut buf = Vec::new();
    a.export(None, &mut buf).unwrap();

    // Same name, same middleware: import succeeds and decodes.
    let dir_b = tempdir().unwrap();
    let b = TxnLog::open_with(dir_b.path(), "testing", Config::default(), armored_chain()).unwrap();
    let mut seen = Vec::new();
    b.import(buf.as_slice(), |_, k, _| {
        seen.push(k.to_vec());
        Ok(true)
    })
    .unwrap();
    assert_eq!(seen[0], b"greeting");

    // Same name, no middleware: the token differs, the seal fails.
    let dir_c = tempdir().unwrap();
    let c = TxnLog::open(dir_c.path(), "testing").unwrap();
    assert!(matches!(
        c.import(buf.as_slice(), |_, _, _| Ok(true)),
        Err(LogError::MacMismatch)
    ));

    // Different name, same middleware: rejected as well.
    let dir_d = tempdir().unwrap();
    let d = TxnLog::open_with(dir_d.path(), "other", Config::default(), armored_chain()).unwrap();
    assert!(matches!(
        d.import(buf.as_slice(), |_, _, _| Ok(true)),
        Err(LogError::MacMismatch)
    ));
}

#[test]
fn deletes_flow_through_iteration_and_txn_info() {
    let dir = tempdir().unwrap();
    let log = TxnLog::open(dir.path(), "testing").unwrap();

    log.txn(|txn| {
        txn.put(b"a", b"1")?;
        txn.delete(b"b")
    })
    .unwrap();

    let got = records(&log, None);
    assert_eq!(got[1].0, LineTag::Delete);
    assert_eq!(got[1].1, b"b");
    assert!(got[1].2.is_empty());

    log.for_each_txn(None, true, |info| {
        assert_eq!(info.actions.len(), 2);
        assert!(info.actions[0].put);
        assert!(!info.actions[1].put);
        assert!(info.ts > 0);
        Ok(true)
    })
    .unwrap();
}
