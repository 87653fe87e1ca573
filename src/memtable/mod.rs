// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod iter;

pub use iter::MemtableIter;

use crate::arena::Arena;
use crate::comparator::BytewiseComparator;
use crate::format::{
    compare_internal_keys, pack_seqno_and_type, parse_internal_key, SeqNo, ValueType,
    TRAILER_SIZE, VALUE_TYPE_FOR_SEEK,
};
use byteorder::{LittleEndian, WriteBytesExt};
use crossbeam_skiplist::SkipMap;
use std::io::Write;
use std::ops::Bound;
use std::ptr::NonNull;
use std::sync::Mutex;
use varint_rs::{VarintReader, VarintWriter};

/// Reference to an encoded entry
///
/// Points into arena-owned memory:
///
/// `varint32 internal_key_len | internal key | varint32 value_len | value`
///
/// The arena never frees or relocates, so the pointee stays valid for
/// the lifetime of the memtable that owns both.
#[derive(Copy, Clone, Debug)]
pub(crate) struct EntryRef {
    ptr: NonNull<u8>,
    len: u32,
}

// SAFETY: an `EntryRef` points into the arena owned by the same memtable
// and never outlives it; the bytes behind it are immutable once written.
#[expect(unsafe_code, reason = "see safety")]
unsafe impl Send for EntryRef {}

// SAFETY: see above; shared reads of immutable bytes are safe.
#[expect(unsafe_code, reason = "see safety")]
unsafe impl Sync for EntryRef {}

impl EntryRef {
    fn record(&self) -> &[u8] {
        // SAFETY: `ptr` and `len` describe one arena allocation that was
        // fully initialized before this reference was published.
        #[expect(unsafe_code, reason = "see safety")]
        unsafe {
            std::slice::from_raw_parts(self.ptr.as_ptr(), self.len as usize)
        }
    }

    #[expect(clippy::expect_used, reason = "records are well-formed by construction")]
    pub(crate) fn internal_key(&self) -> &[u8] {
        let mut reader = self.record();

        let key_len = reader.read_u32_varint().expect("record should hold key length");

        reader
            .get(..key_len as usize)
            .expect("record should hold the internal key")
    }

    #[expect(clippy::expect_used, reason = "records are well-formed by construction")]
    pub(crate) fn value(&self) -> &[u8] {
        let mut reader = self.record();

        let key_len = reader.read_u32_varint().expect("record should hold key length");
        reader = reader
            .get(key_len as usize..)
            .expect("record should hold the internal key");

        let value_len = reader.read_u32_varint().expect("record should hold value length");

        reader
            .get(..value_len as usize)
            .expect("record should hold the value")
    }
}

impl PartialEq for EntryRef {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for EntryRef {}

impl PartialOrd for EntryRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// The write buffer fixes the bytewise user key order; snapshot-aware
// filtering on top of a custom comparator happens in the user iterator.
impl Ord for EntryRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        compare_internal_keys(
            &BytewiseComparator,
            self.internal_key(),
            other.internal_key(),
        )
    }
}

fn varint_len(mut v: u32) -> usize {
    let mut len = 1;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

/// The memtable serves as an intermediary, ephemeral, sorted storage for new items
///
/// Entry bytes live in an [`Arena`]; the skip-list only orders references
/// to them. When the arena's memory usage exceeds some threshold, the
/// memtable should be flushed to a table.
pub struct Memtable {
    arena: Mutex<Arena>,
    items: SkipMap<EntryRef, ()>,
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

impl Memtable {
    /// Creates an empty memtable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            arena: Mutex::new(Arena::new()),
            items: SkipMap::new(),
        }
    }

    /// Adds an entry to the memtable.
    ///
    /// Deletions are stored as tombstone entries with an empty value.
    ///
    /// # Panics
    ///
    /// Panics if the key is empty.
    pub fn add(&self, seqno: SeqNo, value_type: ValueType, user_key: &[u8], value: &[u8]) {
        assert!(!user_key.is_empty(), "key may not be empty");

        let internal_key_len = user_key.len() + TRAILER_SIZE;

        #[expect(
            clippy::cast_possible_truncation,
            reason = "keys and values are far below 2^32 bytes"
        )]
        let encoded_len = varint_len(internal_key_len as u32)
            + internal_key_len
            + varint_len(value.len() as u32)
            + value.len();

        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let ptr = self
            .arena
            .lock()
            .expect("lock is poisoned")
            .allocate(encoded_len);

        // SAFETY: the arena handed out exactly `encoded_len` writable
        // bytes that no other entry aliases.
        #[expect(unsafe_code, reason = "see safety")]
        let buf = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), encoded_len) };

        let mut writer = &mut *buf;

        #[expect(
            clippy::cast_possible_truncation,
            reason = "keys and values are far below 2^32 bytes"
        )]
        #[expect(clippy::expect_used, reason = "the buffer is sized exactly")]
        {
            writer
                .write_u32_varint(internal_key_len as u32)
                .expect("buffer should fit the record");
            writer.write_all(user_key).expect("buffer should fit the record");
            writer
                .write_u64::<LittleEndian>(pack_seqno_and_type(seqno, value_type))
                .expect("buffer should fit the record");
            writer
                .write_u32_varint(value.len() as u32)
                .expect("buffer should fit the record");
            writer.write_all(value).expect("buffer should fit the record");
        }
        debug_assert!(writer.is_empty(), "record encoding should fill the buffer");

        #[expect(
            clippy::cast_possible_truncation,
            reason = "keys and values are far below 2^32 bytes"
        )]
        self.items.insert(
            EntryRef {
                ptr,
                len: encoded_len as u32,
            },
            (),
        );
    }

    /// Returns the newest version of the given key visible at `seqno`.
    ///
    /// A tombstone is reported as such so callers do not fall through to
    /// older tables.
    #[must_use]
    pub fn get(&self, user_key: &[u8], seqno: SeqNo) -> Option<(ValueType, Vec<u8>)> {
        let lookup = lookup_record(user_key, seqno);

        let lookup_ref = EntryRef {
            ptr: NonNull::from(lookup.as_slice().first()?),
            #[expect(clippy::cast_possible_truncation, reason = "lookup keys are tiny")]
            len: lookup.len() as u32,
        };

        let entry = self.items.lower_bound(Bound::Included(&lookup_ref))?;

        let parsed = parse_internal_key(entry.key().internal_key()).ok()?;

        if parsed.user_key == user_key {
            Some((parsed.value_type, entry.key().value().to_vec()))
        } else {
            None
        }
    }

    /// Creates a bidirectional cursor over all entries.
    #[must_use]
    pub fn iter(&self) -> MemtableIter<'_> {
        MemtableIter::new(&self.items)
    }

    /// Counts the number of entries in the memtable.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the memtable is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns an upper bound of the memory reserved by this memtable.
    ///
    /// This drives the flush decision of the layer above.
    #[must_use]
    #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
    pub fn approximate_memory_usage(&self) -> usize {
        self.arena.lock().expect("lock is poisoned").memory_usage()
    }
}

impl std::fmt::Debug for Memtable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memtable")
            .field("len", &self.len())
            .field("approximate_memory_usage", &self.approximate_memory_usage())
            .finish()
    }
}

/// Builds an encoded record usable as a skip-list seek target.
///
/// The seek tag sorts at or before every real entry of the same user key
/// that is visible at `seqno`.
pub(crate) fn lookup_record(user_key: &[u8], seqno: SeqNo) -> Vec<u8> {
    let internal_key_len = user_key.len() + TRAILER_SIZE;

    let mut buf = Vec::with_capacity(internal_key_len + 6);

    #[expect(
        clippy::cast_possible_truncation,
        reason = "keys are far below 2^32 bytes"
    )]
    #[expect(clippy::expect_used, reason = "writing to a Vec cannot fail")]
    {
        buf.write_u32_varint(internal_key_len as u32)
            .expect("writing to a Vec cannot fail");
        buf.extend_from_slice(user_key);
        buf.write_u64::<LittleEndian>(pack_seqno_and_type(seqno, VALUE_TYPE_FOR_SEEK))
            .expect("writing to a Vec cannot fail");
        buf.write_u32_varint(0).expect("writing to a Vec cannot fail");
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::MAX_SEQNO;
    use test_log::test;

    #[test]
    fn memtable_mvcc_point_read() {
        let memtable = Memtable::new();

        memtable.add(0, ValueType::Value, b"hello-key-999991", b"hello-value-999991");

        let item = memtable.get(b"hello-key-99999", MAX_SEQNO);
        assert_eq!(None, item);

        let (_, value) = memtable.get(b"hello-key-999991", MAX_SEQNO).expect("should exist");
        assert_eq!(b"hello-value-999991", &*value);

        memtable.add(1, ValueType::Value, b"hello-key-999991", b"hello-value-999991-2");

        let (_, value) = memtable.get(b"hello-key-999991", MAX_SEQNO).expect("should exist");
        assert_eq!(b"hello-value-999991-2", &*value);

        // Sequence number cuts off the newer version
        let (_, value) = memtable.get(b"hello-key-999991", 0).expect("should exist");
        assert_eq!(b"hello-value-999991", &*value);

        let (_, value) = memtable.get(b"hello-key-999991", 1).expect("should exist");
        assert_eq!(b"hello-value-999991-2", &*value);
    }

    #[test]
    fn memtable_get_tombstone() {
        let memtable = Memtable::new();

        memtable.add(1, ValueType::Value, b"abc", b"old");
        memtable.add(2, ValueType::Deletion, b"abc", b"");

        let (value_type, value) = memtable.get(b"abc", MAX_SEQNO).expect("should exist");
        assert_eq!(ValueType::Deletion, value_type);
        assert!(value.is_empty());

        let (value_type, value) = memtable.get(b"abc", 1).expect("should exist");
        assert_eq!(ValueType::Value, value_type);
        assert_eq!(b"old", &*value);
    }

    #[test]
    fn memtable_get_prefix() {
        let memtable = Memtable::new();

        memtable.add(0, ValueType::Value, b"abc0", b"v0");
        memtable.add(255, ValueType::Value, b"abc", b"v1");

        let (_, value) = memtable.get(b"abc", MAX_SEQNO).expect("should exist");
        assert_eq!(b"v1", &*value);

        let (_, value) = memtable.get(b"abc0", MAX_SEQNO).expect("should exist");
        assert_eq!(b"v0", &*value);

        assert_eq!(None, memtable.get(b"ab", MAX_SEQNO));
    }

    #[test]
    fn memtable_len_and_usage() {
        let memtable = Memtable::new();
        assert!(memtable.is_empty());
        assert_eq!(0, memtable.approximate_memory_usage());

        for i in 0_u64..100 {
            memtable.add(i, ValueType::Value, format!("key-{i:03}").as_bytes(), b"value");
        }

        assert_eq!(100, memtable.len());
        assert!(memtable.approximate_memory_usage() >= 100 * (7 + 8 + 5));
    }
}
