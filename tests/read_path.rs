// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use scree::format::append_internal_key;
use scree::{
    BoxedInternalIterator, BytewiseComparator, DbIter, Memtable, MergingIter, NoopSampler, SeqNo,
    TableBuilder, TableCache, ValueType, MAX_SEQNO,
};
use std::fs::File;
use std::path::Path;
use test_log::test;

fn ikey(user_key: &[u8], seqno: SeqNo, value_type: ValueType) -> Vec<u8> {
    let mut v = Vec::new();
    append_internal_key(&mut v, user_key, seqno, value_type);
    v
}

fn write_table(
    folder: &Path,
    file_number: u64,
    rows: &[(&[u8], SeqNo, ValueType, &[u8])],
) -> scree::Result<u64> {
    let path = scree::file::table_file_path(folder, file_number);

    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| {
        scree::format::compare_internal_keys(
            &BytewiseComparator,
            &ikey(a.0, a.1, a.2),
            &ikey(b.0, b.1, b.2),
        )
    });

    let mut builder = TableBuilder::new(std::io::BufWriter::new(File::create(path)?));
    for (user_key, seqno, value_type, value) in sorted {
        builder.add(&ikey(user_key, seqno, value_type), value)?;
    }
    builder.finish()
}

struct Fixture {
    _folder: tempfile::TempDir,
    cache: TableCache,
    memtable: Memtable,
    table_sizes: Vec<(u64, u64)>,
}

impl Fixture {
    /// Two flushed tables plus a memtable, with overwrites and deletes
    /// spanning all three.
    fn new() -> scree::Result<Self> {
        let folder = tempfile::tempdir()?;

        let size_1 = write_table(
            folder.path(),
            1,
            &[
                (b"a", 1, ValueType::Value, b"a1"),
                (b"b", 2, ValueType::Value, b"b1"),
                (b"c", 3, ValueType::Value, b"c1"),
            ],
        )?;

        let size_2 = write_table(
            folder.path(),
            2,
            &[
                (b"b", 5, ValueType::Deletion, b""),
                (b"c", 6, ValueType::Value, b"c2"),
                (b"d", 7, ValueType::Value, b"d1"),
            ],
        )?;

        let memtable = Memtable::new();
        memtable.add(8, ValueType::Value, b"a", b"a2");
        memtable.add(9, ValueType::Value, b"e", b"e1");
        memtable.add(10, ValueType::Deletion, b"d", b"");

        let cache = TableCache::new(folder.path(), 16);

        Ok(Self {
            _folder: folder,
            cache,
            memtable,
            table_sizes: vec![(1, size_1), (2, size_2)],
        })
    }

    fn db_iter(&self, snapshot: SeqNo) -> DbIter<'_, BytewiseComparator> {
        let mut children: Vec<BoxedInternalIterator<'_>> =
            vec![Box::new(self.memtable.iter())];

        for (file_number, file_size) in &self.table_sizes {
            children.push(self.cache.iter(*file_number, *file_size));
        }

        DbIter::new(
            BytewiseComparator,
            Box::new(MergingIter::new(BytewiseComparator, children)),
            snapshot,
            Box::new(NoopSampler),
            7,
        )
    }
}

fn scan_forward(iter: &mut DbIter<'_, BytewiseComparator>) -> Vec<(Vec<u8>, Vec<u8>)> {
    iter.seek_to_first();
    let mut out = Vec::new();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next();
    }
    out
}

fn scan_backward(iter: &mut DbIter<'_, BytewiseComparator>) -> Vec<(Vec<u8>, Vec<u8>)> {
    iter.seek_to_last();
    let mut out = Vec::new();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.prev();
    }
    out
}

fn kv(key: &[u8], value: &[u8]) -> (Vec<u8>, Vec<u8>) {
    (key.to_vec(), value.to_vec())
}

#[test]
fn read_path_full_scan_latest_snapshot() -> scree::Result<()> {
    let fixture = Fixture::new()?;

    let mut iter = fixture.db_iter(MAX_SEQNO);
    assert_eq!(
        vec![kv(b"a", b"a2"), kv(b"c", b"c2"), kv(b"e", b"e1")],
        scan_forward(&mut iter),
    );
    iter.status()?;

    Ok(())
}

#[test]
fn read_path_scan_is_direction_independent() -> scree::Result<()> {
    let fixture = Fixture::new()?;

    for snapshot in [1, 2, 4, 6, 8, 9, 10, MAX_SEQNO] {
        let mut iter = fixture.db_iter(snapshot);
        let forward = scan_forward(&mut iter);

        let mut iter = fixture.db_iter(snapshot);
        let mut backward = scan_backward(&mut iter);
        backward.reverse();

        assert_eq!(forward, backward, "diverged at snapshot {snapshot}");
    }

    Ok(())
}

#[test]
fn read_path_old_snapshot_sees_old_view() -> scree::Result<()> {
    let fixture = Fixture::new()?;

    // At sequence 4 neither table 2 nor the memtable exists yet
    let mut iter = fixture.db_iter(4);
    assert_eq!(
        vec![kv(b"a", b"a1"), kv(b"b", b"b1"), kv(b"c", b"c1")],
        scan_forward(&mut iter),
    );

    // At sequence 7 the deletion of "b" and the overwrites are in
    let mut iter = fixture.db_iter(7);
    assert_eq!(
        vec![kv(b"a", b"a1"), kv(b"c", b"c2"), kv(b"d", b"d1")],
        scan_forward(&mut iter),
    );

    Ok(())
}

#[test]
fn read_path_seek() -> scree::Result<()> {
    let fixture = Fixture::new()?;

    let mut iter = fixture.db_iter(MAX_SEQNO);

    // "b" is deleted, so seeking at it lands on "c"
    iter.seek(b"b");
    assert!(iter.valid());
    assert_eq!(b"c", iter.key());
    assert_eq!(b"c2", iter.value());

    iter.prev();
    assert!(iter.valid());
    assert_eq!(b"a", iter.key());
    assert_eq!(b"a2", iter.value());

    iter.prev();
    assert!(!iter.valid());

    Ok(())
}

#[test]
fn read_path_memtable_usage_grows() {
    let memtable = Memtable::new();
    let before = memtable.approximate_memory_usage();

    for i in 0_u64..1_000 {
        memtable.add(i, ValueType::Value, format!("key-{i:04}").as_bytes(), b"value");
    }

    // The flush decision upstairs is based on this number
    assert!(memtable.approximate_memory_usage() > before);
    assert!(memtable.approximate_memory_usage() >= 1_000 * 10);
}

#[test]
fn read_path_point_get_through_cache() -> scree::Result<()> {
    let fixture = Fixture::new()?;

    let (file_number, file_size) = fixture.table_sizes[1];

    let mut found = None;
    fixture.cache.get(
        file_number,
        file_size,
        &ikey(b"c", MAX_SEQNO, ValueType::Value),
        |key, value| {
            found = Some((key.to_vec(), value.to_vec()));
        },
    )?;

    let (key, value) = found.expect("should find entry");
    assert_eq!(b"c", scree::format::extract_user_key(&key));
    assert_eq!(b"c2", &*value);

    Ok(())
}
