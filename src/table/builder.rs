// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::FOOTER_SIZE;
use crate::comparator::BytewiseComparator;
use crate::file::MAGIC_BYTES;
use crate::format::compare_internal_keys;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;
use varint_rs::VarintWriter;
use xxhash_rust::xxh3::Xxh3;

/// Streaming writer for sorted string tables
///
/// Entries must be added in strictly ascending internal key order.
/// Nothing is buffered besides the record index; the data checksum is
/// computed on the fly.
pub struct TableBuilder<W: Write> {
    writer: W,
    hasher: Xxh3,
    offsets: Vec<u32>,
    offset: u32,
    last_key: Vec<u8>,
    scratch: Vec<u8>,
}

impl<W: Write> TableBuilder<W> {
    /// Creates a builder writing to the given sink.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: Xxh3::new(),
            offsets: Vec::new(),
            offset: 0,
            last_key: Vec::new(),
            scratch: Vec::new(),
        }
    }

    /// Number of entries added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns `true` if no entry was added yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Appends an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to the sink fails.
    ///
    /// # Panics
    ///
    /// Panics if `internal_key` does not sort after the previously added key.
    pub fn add(&mut self, internal_key: &[u8], value: &[u8]) -> crate::Result<()> {
        assert!(
            self.last_key.is_empty()
                || compare_internal_keys(&BytewiseComparator, &self.last_key, internal_key).is_lt(),
            "table entries must be added in ascending order",
        );

        self.scratch.clear();

        #[expect(
            clippy::cast_possible_truncation,
            reason = "keys and values are far below 2^32 bytes"
        )]
        #[expect(clippy::expect_used, reason = "writing to a Vec cannot fail")]
        {
            self.scratch
                .write_u32_varint(internal_key.len() as u32)
                .expect("writing to a Vec cannot fail");
            self.scratch.extend_from_slice(internal_key);
            self.scratch
                .write_u32_varint(value.len() as u32)
                .expect("writing to a Vec cannot fail");
            self.scratch.extend_from_slice(value);
        }

        self.writer.write_all(&self.scratch)?;
        self.hasher.update(&self.scratch);

        self.offsets.push(self.offset);

        #[expect(
            clippy::cast_possible_truncation,
            reason = "tables are far below 2^32 bytes of data"
        )]
        {
            self.offset += self.scratch.len() as u32;
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(internal_key);

        Ok(())
    }

    /// Writes index and footer, returning the total file size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to the sink fails.
    pub fn finish(mut self) -> crate::Result<u64> {
        for record_offset in &self.offsets {
            self.writer.write_u32::<LittleEndian>(*record_offset)?;
        }

        self.writer.write_u64::<LittleEndian>(u64::from(self.offset))?;

        #[expect(
            clippy::cast_possible_truncation,
            reason = "tables are far below 2^32 entries"
        )]
        self.writer
            .write_u32::<LittleEndian>(self.offsets.len() as u32)?;

        self.writer
            .write_u128::<LittleEndian>(self.hasher.digest128())?;
        self.writer.write_all(&MAGIC_BYTES)?;
        self.writer.flush()?;

        Ok(u64::from(self.offset) + self.offsets.len() as u64 * 4 + FOOTER_SIZE as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{append_internal_key, ValueType};
    use test_log::test;

    #[test]
    fn builder_size_matches_output() -> crate::Result<()> {
        let mut sink = Vec::new();

        let mut builder = TableBuilder::new(&mut sink);
        assert!(builder.is_empty());

        let mut key = Vec::new();
        append_internal_key(&mut key, b"a", 1, ValueType::Value);
        builder.add(&key, b"value")?;
        assert_eq!(1, builder.len());

        let size = builder.finish()?;
        assert_eq!(sink.len() as u64, size);

        Ok(())
    }

    #[test]
    #[should_panic = "ascending order"]
    fn builder_rejects_unsorted() {
        let mut builder = TableBuilder::new(Vec::new());

        let mut b = Vec::new();
        append_internal_key(&mut b, b"b", 1, ValueType::Value);
        builder.add(&b, b"").expect("should add");

        let mut a = Vec::new();
        append_internal_key(&mut a, b"a", 1, ValueType::Value);
        builder.add(&a, b"").expect("should add");
    }
}
