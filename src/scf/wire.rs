//! SCF wire codec
//!
//! Pure serialize/deserialize functions over a [`BinaryCursor`]. Every call
//! carries the wire-format version explicitly so future format changes can
//! coexist across cluster nodes of different software versions. All
//! multi-byte integers are big-endian.

use std::fmt;

use crate::cursor::{BinaryCursor, CursorError};
use crate::pattern::{PatternError, SubscriptionPattern};

/// Current SCF wire-format version
pub const SCF_WIRE_VERSION: u16 = 1;

/// Upper bound on list counts accepted from the wire, against corrupt or
/// hostile payloads.
const MAX_WIRE_COUNT: u32 = 1_000_000;

/// Errors raised by the wire codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Version not understood by this node
    UnsupportedVersion(u16),
    /// Decoded field violates a structural invariant
    InvalidField,
    /// Underlying cursor failure
    Cursor(CursorError),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion(v) => write!(f, "unsupported SCF wire version: {}", v),
            Self::InvalidField => write!(f, "decoded field violates a structural invariant"),
            Self::Cursor(e) => write!(f, "cursor error: {}", e),
        }
    }
}

impl std::error::Error for WireError {}

impl From<CursorError> for WireError {
    fn from(e: CursorError) -> Self {
        WireError::Cursor(e)
    }
}

impl From<PatternError> for WireError {
    fn from(_: PatternError) -> Self {
        WireError::InvalidField
    }
}

fn check_version(version: u16) -> Result<(), WireError> {
    if version != SCF_WIRE_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    Ok(())
}

/// Serialize a pattern: `u16 plusCount, u16[plusCount] plusLevels,
/// u16 hashLevel, u16 lastLevel`. The empty pattern writes all zeros, the
/// canonical encoding for a removed/absent entry.
pub fn write_subscription_pattern(
    version: u16,
    pattern: &SubscriptionPattern,
    cursor: &mut BinaryCursor,
) -> Result<(), WireError> {
    check_version(version)?;
    cursor.write_u16(pattern.plus_levels().len() as u16)?;
    for &level in pattern.plus_levels() {
        cursor.write_u16(level)?;
    }
    cursor.write_u16(pattern.hash_level())?;
    cursor.write_u16(pattern.last_level())?;
    Ok(())
}

/// Deserialize a pattern written by [`write_subscription_pattern`],
/// re-validating its structural invariants.
pub fn read_subscription_pattern(
    version: u16,
    cursor: &mut BinaryCursor,
) -> Result<SubscriptionPattern, WireError> {
    check_version(version)?;
    let plus_count = cursor.read_u16()?;
    let mut plus_levels = Vec::with_capacity(plus_count as usize);
    for _ in 0..plus_count {
        plus_levels.push(cursor.read_u16()?);
    }
    let hash_level = cursor.read_u16()?;
    let last_level = cursor.read_u16()?;
    Ok(SubscriptionPattern::from_parts(
        &plus_levels,
        hash_level,
        last_level,
    )?)
}

/// A pattern and how many subscriptions carry it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternFrequency {
    pub pattern: SubscriptionPattern,
    pub frequency: u32,
}

/// Aggregated wildcard-subscription statistics published to the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Wildcard subscriptions represented on the Bloom filter
    pub wildcard_on_bloom_filter: u32,
    /// Wildcard subscriptions represented on the topic tree
    pub wildcard_on_topic_tree: u32,
    /// Highest-frequency patterns currently on the topic tree
    pub top_on_topic_tree: Vec<PatternFrequency>,
    /// Lowest-frequency patterns currently on the Bloom filter
    pub bottom_on_bloom_filter: Vec<PatternFrequency>,
}

/// Serialize stats: the two counters, then the two ranked
/// `(pattern, u32 freq)` lists, each with a `u32` count prefix.
pub fn write_subscription_stats(
    version: u16,
    stats: &SubscriptionStats,
    cursor: &mut BinaryCursor,
) -> Result<(), WireError> {
    check_version(version)?;
    cursor.write_u32(stats.wildcard_on_bloom_filter)?;
    cursor.write_u32(stats.wildcard_on_topic_tree)?;
    for list in [&stats.top_on_topic_tree, &stats.bottom_on_bloom_filter] {
        cursor.write_u32(list.len() as u32)?;
        for entry in list {
            write_subscription_pattern(version, &entry.pattern, cursor)?;
            cursor.write_u32(entry.frequency)?;
        }
    }
    Ok(())
}

/// Deserialize stats written by [`write_subscription_stats`]
pub fn read_subscription_stats(
    version: u16,
    cursor: &mut BinaryCursor,
) -> Result<SubscriptionStats, WireError> {
    check_version(version)?;
    let wildcard_on_bloom_filter = cursor.read_u32()?;
    let wildcard_on_topic_tree = cursor.read_u32()?;

    let mut lists: [Vec<PatternFrequency>; 2] = [Vec::new(), Vec::new()];
    for list in &mut lists {
        let count = cursor.read_u32()?;
        if count > MAX_WIRE_COUNT {
            return Err(WireError::InvalidField);
        }
        list.reserve(count as usize);
        for _ in 0..count {
            let pattern = read_subscription_pattern(version, cursor)?;
            let frequency = cursor.read_u32()?;
            list.push(PatternFrequency { pattern, frequency });
        }
    }
    let [top_on_topic_tree, bottom_on_bloom_filter] = lists;

    Ok(SubscriptionStats {
        wildcard_on_bloom_filter,
        wildcard_on_topic_tree,
        top_on_topic_tree,
        bottom_on_bloom_filter,
    })
}
