// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Internal key encoding.
//!
//! Every stored entry is keyed by its user key plus an 8-byte trailer
//! packing the sequence number (high 56 bits) and the value type tag
//! (low 8 bits). Internal keys order by user key ascending, then trailer
//! descending, so the newest version of a key comes first.

use crate::Comparator;
use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;

/// Sequence number - a monotonically increasing counter
///
/// A value with a higher sequence number shadows an item with the
/// same key and lower sequence number. This enables MVCC.
pub type SeqNo = u64;

/// Largest representable sequence number
///
/// Sequence numbers share their trailer word with the value type tag,
/// which occupies the low 8 bits.
pub const MAX_SEQNO: SeqNo = (1 << 56) - 1;

/// Size of the trailer appended to every user key
pub const TRAILER_SIZE: usize = std::mem::size_of::<u64>();

/// Value type (regular value or tombstone)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValueType {
    /// Deleted value
    Deletion,

    /// Existing value
    Value,
}

/// Tag used when building seek targets
///
/// It sorts at or before any real entry with the same user key and
/// sequence number, so a seek lands on the first visible candidate.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Value;

impl TryFrom<u8> for ValueType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Deletion),
            1 => Ok(Self::Value),
            _ => Err(()),
        }
    }
}

impl From<ValueType> for u8 {
    fn from(value: ValueType) -> Self {
        match value {
            ValueType::Deletion => 0,
            ValueType::Value => 1,
        }
    }
}

/// An internal key, decomposed into its parts
///
/// Borrows the user key from the encoded representation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ParsedInternalKey<'a> {
    /// User-defined key - an arbitrary byte array
    pub user_key: &'a [u8],

    /// Sequence number of the write
    pub seqno: SeqNo,

    /// Whether the entry is a value or a tombstone
    pub value_type: ValueType,
}

pub(crate) fn pack_seqno_and_type(seqno: SeqNo, value_type: ValueType) -> u64 {
    debug_assert!(seqno <= MAX_SEQNO, "sequence number out of range");
    (seqno << 8) | u64::from(u8::from(value_type))
}

/// Appends the encoding of `(user_key, seqno, value_type)` to `dst`.
pub fn append_internal_key(dst: &mut Vec<u8>, user_key: &[u8], seqno: SeqNo, value_type: ValueType) {
    dst.extend_from_slice(user_key);

    let mut trailer = [0; TRAILER_SIZE];
    LittleEndian::write_u64(&mut trailer, pack_seqno_and_type(seqno, value_type));
    dst.extend_from_slice(&trailer);
}

/// Parses an encoded internal key.
///
/// # Errors
///
/// Fails with a corruption error if the key is shorter than its trailer
/// or carries an unknown value type tag.
pub fn parse_internal_key(key: &[u8]) -> crate::Result<ParsedInternalKey<'_>> {
    let Some(split) = key.len().checked_sub(TRAILER_SIZE) else {
        return Err(crate::Error::Corruption("internal key shorter than trailer"));
    };

    let (user_key, trailer) = key.split_at(split);
    let packed = LittleEndian::read_u64(trailer);

    // NOTE: Truncation is intended, the tag is the low byte
    #[allow(clippy::cast_possible_truncation)]
    let tag = packed as u8;

    let value_type = ValueType::try_from(tag)
        .map_err(|()| crate::Error::Corruption("unknown value type tag"))?;

    Ok(ParsedInternalKey {
        user_key,
        seqno: packed >> 8,
        value_type,
    })
}

/// Returns the user key portion of an encoded internal key.
#[must_use]
pub fn extract_user_key(key: &[u8]) -> &[u8] {
    debug_assert!(key.len() >= TRAILER_SIZE, "internal key shorter than trailer");

    let split = key.len().saturating_sub(TRAILER_SIZE);

    // NOTE: Cannot fail, split <= len
    key.get(..split).unwrap_or_default()
}

fn trailer(key: &[u8]) -> u64 {
    let split = key.len().saturating_sub(TRAILER_SIZE);
    key.get(split..).map_or(0, LittleEndian::read_u64)
}

/// Orders encoded internal keys.
///
/// User key ascending per the given comparator, then trailer descending,
/// so forward iteration visits the most recent version of a key first.
pub fn compare_internal_keys<C: Comparator + ?Sized>(cmp: &C, a: &[u8], b: &[u8]) -> Ordering {
    match cmp.compare(extract_user_key(a), extract_user_key(b)) {
        Ordering::Equal => trailer(b).cmp(&trailer(a)),
        ord => ord,
    }
}
