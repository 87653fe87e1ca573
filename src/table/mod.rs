// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod builder;
mod iter;

pub use builder::TableBuilder;
pub use iter::TableIter;

use crate::checksum::Checksum;
use crate::comparator::BytewiseComparator;
use crate::file::{read_exact_at, MAGIC_BYTES};
use crate::format::compare_internal_keys;
use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use varint_rs::VarintReader;

/// Footer layout: index offset, entry count, data checksum, magic
pub(crate) const FOOTER_SIZE: usize = 8 + 4 + 16 + 4;

/// An immutable sorted string table
///
/// Entries are `(internal key, value)` records in internal key order.
/// The record index is held in memory; record payloads are read from the
/// file on access. The table owns its file handle, so both go away
/// together when the last reference is dropped.
pub struct Table {
    file: File,

    /// Start offset of each record in the data section
    index: Vec<u32>,

    /// End of the data section
    data_end: u64,
}

impl Table {
    /// Opens a table, verifying footer framing and the data checksum.
    ///
    /// `file_size` must be the exact size of the file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails validation.
    pub fn open(file: File, file_size: u64) -> crate::Result<Self> {
        if file_size < FOOTER_SIZE as u64 {
            return Err(crate::Error::Corruption("table file too short"));
        }

        let footer = read_exact_at(&file, file_size - FOOTER_SIZE as u64, FOOTER_SIZE)?;

        if footer.get(FOOTER_SIZE - 4..) != Some(MAGIC_BYTES.as_slice()) {
            return Err(crate::Error::Corruption("invalid table magic"));
        }

        let index_offset = LittleEndian::read_u64(footer.get(0..8).unwrap_or_default());
        let entry_count = LittleEndian::read_u32(footer.get(8..12).unwrap_or_default());
        let expected_checksum =
            Checksum::from_raw(LittleEndian::read_u128(footer.get(12..28).unwrap_or_default()));

        // The footer is untrusted input, so the framing math must not
        // overflow
        let index_len = u64::from(entry_count) * 4;
        if index_offset
            .checked_add(index_len)
            .and_then(|end| end.checked_add(FOOTER_SIZE as u64))
            != Some(file_size)
        {
            return Err(crate::Error::Corruption("table framing does not match file size"));
        }

        #[expect(
            clippy::cast_possible_truncation,
            reason = "the data section was just bounds-checked against the file size"
        )]
        let data = read_exact_at(&file, 0, index_offset as usize)?;
        Checksum::of(&data).check(expected_checksum)?;

        #[expect(clippy::cast_possible_truncation, reason = "bounds-checked above")]
        let raw_index = read_exact_at(&file, index_offset, index_len as usize)?;

        let mut index = Vec::with_capacity(entry_count as usize);
        let mut prev = None;

        for chunk in raw_index.chunks_exact(4) {
            let offset = LittleEndian::read_u32(chunk);

            if u64::from(offset) >= index_offset || prev.is_some_and(|prev| offset <= prev) {
                return Err(crate::Error::Corruption("table index is not ascending"));
            }

            prev = Some(offset);
            index.push(offset);
        }

        Ok(Self {
            file,
            index,
            data_end: index_offset,
        })
    }

    /// Number of entries in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Looks up `target` and hands the first entry at or after it to `saver`.
    ///
    /// The saver decides whether the entry actually matches; this mirrors
    /// how point reads share the seek path with range scans.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be read.
    pub fn get<F: FnMut(&[u8], &[u8])>(&self, target: &[u8], mut saver: F) -> crate::Result<()> {
        if let Some(pos) = self.find_greater_or_equal(target)? {
            let (key, value) = self.read_record(pos)?;
            saver(&key, &value);
        }

        Ok(())
    }

    /// Returns the position of the first record with key >= `target`.
    pub(crate) fn find_greater_or_equal(&self, target: &[u8]) -> crate::Result<Option<usize>> {
        let mut lo = 0;
        let mut hi = self.index.len();

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (key, _) = self.read_record(mid)?;

            if compare_internal_keys(&BytewiseComparator, &key, target).is_lt() {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        Ok((lo < self.index.len()).then_some(lo))
    }

    /// Reads and decodes the record at `pos`.
    pub(crate) fn read_record(&self, pos: usize) -> crate::Result<(Vec<u8>, Vec<u8>)> {
        let Some(&start) = self.index.get(pos) else {
            return Err(crate::Error::Corruption("record position out of bounds"));
        };

        let end = self
            .index
            .get(pos + 1)
            .map_or(self.data_end, |next| u64::from(*next));

        #[expect(
            clippy::cast_possible_truncation,
            reason = "record extents were validated at open"
        )]
        let buf = read_exact_at(&self.file, u64::from(start), (end - u64::from(start)) as usize)?;

        let mut reader = buf.as_slice();

        let key_len = reader.read_u32_varint()? as usize;
        let key = reader
            .get(..key_len)
            .ok_or(crate::Error::Corruption("record key out of bounds"))?
            .to_vec();
        reader = reader.get(key_len..).unwrap_or_default();

        let value_len = reader.read_u32_varint()? as usize;
        let value = reader
            .get(..value_len)
            .ok_or(crate::Error::Corruption("record value out of bounds"))?
            .to_vec();

        if reader.len() != value_len {
            return Err(crate::Error::Corruption("record framing does not match index"));
        }

        Ok((key, value))
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("len", &self.len())
            .field("data_end", &self.data_end)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{append_internal_key, SeqNo, ValueType, MAX_SEQNO};
    use std::io::Write;
    use test_log::test;

    fn ikey(user_key: &[u8], seqno: SeqNo, value_type: ValueType) -> Vec<u8> {
        let mut v = Vec::new();
        append_internal_key(&mut v, user_key, seqno, value_type);
        v
    }

    fn build_table(path: &std::path::Path, rows: &[(&[u8], SeqNo, ValueType, &[u8])]) -> u64 {
        let mut builder = TableBuilder::new(std::io::BufWriter::new(
            File::create(path).expect("should create file"),
        ));

        for (user_key, seqno, value_type, value) in rows {
            builder
                .add(&ikey(user_key, *seqno, *value_type), value)
                .expect("should add");
        }

        builder.finish().expect("should finish")
    }

    #[test]
    fn table_open_and_read() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let path = folder.path().join("000001.tbl");

        let size = build_table(
            &path,
            &[
                (b"a", 1, ValueType::Value, b"va"),
                (b"b", 2, ValueType::Value, b"vb"),
                (b"c", 3, ValueType::Deletion, b""),
            ],
        );
        assert_eq!(size, std::fs::metadata(&path)?.len());

        let table = Table::open(File::open(&path)?, size)?;
        assert_eq!(3, table.len());

        let (key, value) = table.read_record(0)?;
        assert_eq!(ikey(b"a", 1, ValueType::Value), key);
        assert_eq!(b"va", &*value);

        let (key, value) = table.read_record(2)?;
        assert_eq!(ikey(b"c", 3, ValueType::Deletion), key);
        assert!(value.is_empty());

        Ok(())
    }

    #[test]
    fn table_get() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let path = folder.path().join("000001.tbl");

        let size = build_table(
            &path,
            &[
                (b"a", 1, ValueType::Value, b"va"),
                (b"c", 3, ValueType::Value, b"vc"),
            ],
        );

        let table = Table::open(File::open(&path)?, size)?;

        let mut found = None;
        table.get(&ikey(b"b", MAX_SEQNO, ValueType::Value), |key, value| {
            found = Some((key.to_vec(), value.to_vec()));
        })?;

        // The saver receives the first entry at or after the target
        let (key, value) = found.expect("should find an entry");
        assert_eq!(ikey(b"c", 3, ValueType::Value), key);
        assert_eq!(b"vc", &*value);

        let mut found = None;
        table.get(&ikey(b"x", MAX_SEQNO, ValueType::Value), |key, value| {
            found = Some((key.to_vec(), value.to_vec()));
        })?;
        assert!(found.is_none());

        Ok(())
    }

    #[test]
    fn table_open_empty() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let path = folder.path().join("000001.tbl");

        let size = build_table(&path, &[]);

        let table = Table::open(File::open(&path)?, size)?;
        assert!(table.is_empty());

        Ok(())
    }

    #[test]
    fn table_open_rejects_bad_magic() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let path = folder.path().join("000001.tbl");

        let mut file = File::create(&path)?;
        file.write_all(&[0; 64])?;
        file.sync_all()?;

        assert!(matches!(
            Table::open(File::open(&path)?, 64),
            Err(crate::Error::Corruption(_)),
        ));

        Ok(())
    }

    #[test]
    fn table_open_rejects_truncated() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let path = folder.path().join("000001.tbl");

        let mut file = File::create(&path)?;
        file.write_all(b"ab")?;
        file.sync_all()?;

        assert!(Table::open(File::open(&path)?, 2).is_err());

        Ok(())
    }

    #[test]
    fn table_open_rejects_bit_flip() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let path = folder.path().join("000001.tbl");

        let size = build_table(&path, &[(b"a", 1, ValueType::Value, b"va")]);

        // Flip a byte inside the data section
        let mut raw = std::fs::read(&path)?;
        *raw.get_mut(2).expect("file is longer than 2 bytes") ^= 0xFF;
        std::fs::write(&path, &raw)?;

        assert!(matches!(
            Table::open(File::open(&path)?, size),
            Err(crate::Error::ChecksumMismatch { .. }),
        ));

        Ok(())
    }
}
