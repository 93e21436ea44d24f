//! SCF publisher
//!
//! Owns every sequence counter and per-artifact metadata, serializes each
//! artifact into a shared scratch cursor and hands the bytes to the
//! membership channel. One coarse mutex serializes all publish operations
//! against each other; control-plane traffic is low-rate and the lock also
//! covers the scratch buffer, which is itself not thread-safe.
//!
//! Bloom-filter, wildcard-pattern and regular-covering-filter artifacts draw
//! from a single strictly increasing counter, so their issuance order is a
//! total order consumers use to detect staleness. The remaining channels
//! (subscription stats, retained stats, monitoring status, server lists)
//! each carry an independent counter.
//!
//! Failure model: validation and state errors are detected before anything
//! is serialized and consume no sequence number; a sequence number is
//! committed only after the channel accepts the write.

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::ScfConfig;
use crate::cursor::{BinaryCursor, CursorError};
use crate::pattern::SubscriptionPattern;
use crate::scf::wire::{self, SubscriptionStats, WireError, SCF_WIRE_VERSION};

/// Bloom filter over exact (non-wildcard) subscriptions
pub const TAG_EXACT_SUB: &str = "ES";
/// Bloom filter over wildcard subscriptions
pub const TAG_WILDCARD_SUB: &str = "WS";

const PERMITTED_TAGS: [&str; 2] = [TAG_EXACT_SUB, TAG_WILDCARD_SUB];

const CHANNEL_WCSP: &str = "WCSP";
const CHANNEL_RCF: &str = "RCF";
const CHANNEL_SUB_STATS: &str = "SSTATS";
const CHANNEL_RETAINED_STATS: &str = "RSTATS";
const CHANNEL_MONITORING: &str = "MONSTAT";
const CHANNEL_REMOVED_SERVERS: &str = "RMSRV";
const CHANNEL_RESTORED: &str = "RNIV";
const CHANNEL_FORWARDING: &str = "FWDEP";
const CHANNEL_SERVER_INFO: &str = "LSINFO";

/// Errors surfaced by the membership channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// Channel has been shut down
    Closed,
    /// Channel-internal failure
    Failed(&'static str),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "membership channel is closed"),
            Self::Failed(msg) => write!(f, "membership channel failure: {}", msg),
        }
    }
}

impl std::error::Error for ChannelError {}

/// The membership/gossip layer as seen by the publisher: a reliable
/// key-value propagation channel. Implementations map these onto the gossip
/// node state (set key / delete key).
pub trait AttributeChannel: Send + Sync {
    fn set_attribute(&self, key: &str, value: &[u8]) -> Result<(), ChannelError>;
    fn remove_attribute(&self, key: &str) -> Result<(), ChannelError>;
}

/// Publisher errors, with a stable numeric code for the clustering control
/// component (it never sees the channel layer's own error taxonomy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScfError {
    /// Malformed input: illegal tag, bad bin count, missing required field
    IllegalArgument(&'static str),
    /// Operation not valid in the current state, e.g. update before base
    IllegalState(&'static str),
    /// Serialization invariant violated (should not happen on valid input)
    Internal(&'static str),
    /// Membership channel rejected the write
    Channel(ChannelError),
}

impl ScfError {
    /// Stable numeric return code. Code 4 is reserved for allocation
    /// failure, which Rust surfaces as an abort rather than an error value.
    pub fn code(&self) -> i32 {
        match self {
            Self::IllegalArgument(_) => 1,
            Self::IllegalState(_) => 2,
            Self::Internal(_) => 3,
            Self::Channel(_) => 5,
        }
    }
}

impl fmt::Display for ScfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalArgument(msg) => write!(f, "illegal argument: {}", msg),
            Self::IllegalState(msg) => write!(f, "illegal state: {}", msg),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
            Self::Channel(e) => write!(f, "channel error: {}", e),
        }
    }
}

impl std::error::Error for ScfError {}

impl From<ChannelError> for ScfError {
    fn from(e: ChannelError) -> Self {
        ScfError::Channel(e)
    }
}

impl From<CursorError> for ScfError {
    fn from(_: CursorError) -> Self {
        ScfError::Internal("scratch buffer write failed")
    }
}

impl From<WireError> for ScfError {
    fn from(_: WireError) -> Self {
        ScfError::Internal("wire serialization failed")
    }
}

/// Bloom filter kind carried in the base payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum BloomFilterType {
    /// No filter; a base of this type with zero bins removes the filter
    None = 0,
    Standard = 1,
    Counting = 2,
}

/// Per-artifact sequence metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqnInfo {
    /// Sequence number of the last full base snapshot
    pub base: u64,
    /// Sequence number of the last incremental update (equals `base` when no
    /// updates have been published since)
    pub last_update: u64,
    /// Updates published since the last base; resets to 0 on a new base
    pub num_updates: u32,
    pub updates_size_bytes: usize,
    pub base_size_bytes: usize,
}

impl SqnInfo {
    fn new_base(sqn: u64, size: usize) -> Self {
        Self {
            base: sqn,
            last_update: sqn,
            num_updates: 0,
            updates_size_bytes: 0,
            base_size_bytes: size,
        }
    }

    fn record_update(&mut self, sqn: u64, size: usize) {
        self.last_update = sqn;
        self.num_updates += 1;
        self.updates_size_bytes += size;
    }
}

/// All mutable publisher state, guarded by one mutex
struct Inner {
    /// Shared counter for Bloom-filter / WCSP / RCF artifacts
    sqn: u64,
    bloom: AHashMap<String, SqnInfo>,
    wcsp: Option<SqnInfo>,
    rcf: Option<SqnInfo>,
    sqn_sub_stats: u64,
    sqn_retained_stats: u64,
    sqn_monitoring_status: u64,
    sqn_removed_servers: u64,
    sqn_restored: u64,
    scratch: BinaryCursor,
}

/// Publishes SCF artifacts to the membership channel
pub struct ScfPublisher {
    channel: Arc<dyn AttributeChannel>,
    wire_version: u16,
    inner: Mutex<Inner>,
}

impl ScfPublisher {
    pub fn new(channel: Arc<dyn AttributeChannel>) -> Self {
        Self::build(channel, &ScfConfig::default())
    }

    /// Rejects a configured wire version this build cannot emit.
    pub fn with_config(
        channel: Arc<dyn AttributeChannel>,
        config: &ScfConfig,
    ) -> Result<Self, ScfError> {
        if config.wire_version != SCF_WIRE_VERSION {
            return Err(ScfError::IllegalArgument("unsupported wire version"));
        }
        Ok(Self::build(channel, config))
    }

    fn build(channel: Arc<dyn AttributeChannel>, config: &ScfConfig) -> Self {
        Self {
            channel,
            wire_version: config.wire_version,
            inner: Mutex::new(Inner {
                sqn: 0,
                bloom: AHashMap::new(),
                wcsp: None,
                rcf: None,
                sqn_sub_stats: 0,
                sqn_retained_stats: 0,
                sqn_monitoring_status: 0,
                sqn_removed_servers: 0,
                sqn_restored: 0,
                scratch: BinaryCursor::with_capacity(config.scratch_capacity),
            }),
        }
    }

    /// Last sequence number issued on the shared BF/WCSP/RCF counter
    pub fn sqn(&self) -> u64 {
        self.inner.lock().sqn
    }

    /// Updates published for `tag` since its last base; `None` without a base
    pub fn num_bloom_filter_updates(&self, tag: &str) -> Option<u32> {
        self.inner.lock().bloom.get(tag).map(|i| i.num_updates)
    }

    pub fn bloom_filter_info(&self, tag: &str) -> Option<SqnInfo> {
        self.inner.lock().bloom.get(tag).copied()
    }

    pub fn wcsp_info(&self) -> Option<SqnInfo> {
        self.inner.lock().wcsp
    }

    pub fn rcf_info(&self) -> Option<SqnInfo> {
        self.inner.lock().rcf
    }

    /// Publish a full Bloom-filter snapshot for `tag` and retire the
    /// previous epoch's update channels. `num_bins == 0` (with an empty bit
    /// buffer) is the canonical remove signal. Returns the base sequence
    /// number.
    pub fn publish_bloom_filter_base(
        &self,
        tag: &str,
        bf_type: BloomFilterType,
        num_hashes: i16,
        num_bins: i32,
        bits: &[u8],
    ) -> Result<u64, ScfError> {
        if !PERMITTED_TAGS.contains(&tag) {
            return Err(ScfError::IllegalArgument("unknown bloom filter tag"));
        }
        if num_bins < 0 || num_bins % 8 != 0 {
            return Err(ScfError::IllegalArgument(
                "bloom filter bin count must be a non-negative multiple of 8",
            ));
        }
        if num_hashes < 0 {
            return Err(ScfError::IllegalArgument("negative hash count"));
        }
        if bits.len() != (num_bins / 8) as usize {
            return Err(ScfError::IllegalArgument(
                "bit buffer length does not match bin count",
            ));
        }

        let mut inner = self.inner.lock();
        let sqn = inner.sqn + 1;

        inner.scratch.reset();
        inner.scratch.write_u64(sqn)?;
        inner.scratch.write_i16(bf_type as i16)?;
        inner.scratch.write_i16(num_hashes)?;
        inner.scratch.write_i32(num_bins)?;
        inner.scratch.write_bytes(bits)?;

        let key = format!("{}B", tag);
        let size = inner.scratch.written_len();
        self.channel.set_attribute(&key, inner.scratch.data())?;

        inner.sqn = sqn;
        let previous = inner.bloom.insert(tag.to_string(), SqnInfo::new_base(sqn, size));
        // Retirement stays under the lock: a concurrent update call for the
        // new epoch must not publish a U<k> key this loop is deleting
        if let Some(previous) = previous {
            self.retire_updates(tag, previous.num_updates);
        }
        drop(inner);

        debug!(tag, sqn, num_bins, "published bloom filter base");
        Ok(sqn)
    }

    /// Remove the Bloom filter for `tag` by publishing an empty base
    pub fn remove_bloom_filter(&self, tag: &str) -> Result<u64, ScfError> {
        self.publish_bloom_filter_base(tag, BloomFilterType::None, 0, 0, &[])
    }

    /// Publish an incremental bit-delta update for `tag`. Positive indices
    /// set the (1-indexed) bin, negative indices clear `abs(index)`.
    /// Requires a prior base.
    pub fn publish_bloom_filter_update(&self, tag: &str, deltas: &[i32]) -> Result<u64, ScfError> {
        if !PERMITTED_TAGS.contains(&tag) {
            return Err(ScfError::IllegalArgument("unknown bloom filter tag"));
        }
        if deltas.is_empty() {
            return Err(ScfError::IllegalArgument("empty bin delta list"));
        }
        if deltas.contains(&0) {
            return Err(ScfError::IllegalArgument("bin indices are 1-based, 0 is invalid"));
        }

        let mut inner = self.inner.lock();
        let info = *inner
            .bloom
            .get(tag)
            .ok_or(ScfError::IllegalState("update published before base"))?;
        let sqn = inner.sqn + 1;

        inner.scratch.reset();
        inner.scratch.write_u64(sqn)?;
        inner.scratch.write_i32(deltas.len() as i32)?;
        for &delta in deltas {
            inner.scratch.write_i32(delta)?;
        }

        let key = format!("{}U{}", tag, info.num_updates + 1);
        let size = inner.scratch.written_len();
        self.channel.set_attribute(&key, inner.scratch.data())?;

        inner.sqn = sqn;
        if let Some(info) = inner.bloom.get_mut(tag) {
            info.record_update(sqn, size);
        }
        drop(inner);

        debug!(tag, sqn, count = deltas.len(), "published bloom filter update");
        Ok(sqn)
    }

    /// Publish a full wildcard-subscription-pattern snapshot. A `None`
    /// pattern is illegal in a base: bases must be complete.
    pub fn publish_wc_subscription_pattern_base(
        &self,
        entries: &[(u64, Option<&SubscriptionPattern>)],
    ) -> Result<u64, ScfError> {
        if entries.iter().any(|(_, p)| p.is_none()) {
            return Err(ScfError::IllegalArgument("null pattern in base list"));
        }
        self.publish_pattern_list(CHANNEL_WCSP, entries, true)
    }

    /// Publish an incremental pattern update; a `None` pattern serializes
    /// the canonical empty pattern, which readers interpret as "delete id".
    pub fn publish_wc_subscription_pattern_update(
        &self,
        entries: &[(u64, Option<&SubscriptionPattern>)],
    ) -> Result<u64, ScfError> {
        self.publish_pattern_list(CHANNEL_WCSP, entries, false)
    }

    /// Publish a full regular-covering-filter snapshot. A `None` filter
    /// string is illegal in a base.
    pub fn publish_regular_covering_filter_base(
        &self,
        entries: &[(u64, Option<&str>)],
    ) -> Result<u64, ScfError> {
        if entries.iter().any(|(_, s)| s.is_none()) {
            return Err(ScfError::IllegalArgument("null filter in base list"));
        }
        self.publish_string_list(CHANNEL_RCF, entries, true)
    }

    /// Publish an incremental covering-filter update; a `None` string
    /// serializes the empty string, which readers interpret as "delete id".
    pub fn publish_regular_covering_filter_update(
        &self,
        entries: &[(u64, Option<&str>)],
    ) -> Result<u64, ScfError> {
        self.publish_string_list(CHANNEL_RCF, entries, false)
    }

    fn publish_pattern_list(
        &self,
        channel: &str,
        entries: &[(u64, Option<&SubscriptionPattern>)],
        is_base: bool,
    ) -> Result<u64, ScfError> {
        let empty = SubscriptionPattern::empty();
        let wire_version = self.wire_version;
        let mut inner = self.inner.lock();
        if !is_base && aggregate_info(&mut inner, channel).is_none() {
            return Err(ScfError::IllegalState("update published before base"));
        }
        let sqn = inner.sqn + 1;

        inner.scratch.reset();
        inner.scratch.write_u64(sqn)?;
        inner.scratch.write_u32(entries.len() as u32)?;
        for (id, pattern) in entries {
            inner.scratch.write_u64(*id)?;
            let pattern = pattern.unwrap_or(&empty);
            wire::write_subscription_pattern(wire_version, pattern, &mut inner.scratch)?;
        }

        self.commit_aggregate(channel, is_base, sqn, inner)
    }

    fn publish_string_list(
        &self,
        channel: &str,
        entries: &[(u64, Option<&str>)],
        is_base: bool,
    ) -> Result<u64, ScfError> {
        let mut inner = self.inner.lock();
        if !is_base && aggregate_info(&mut inner, channel).is_none() {
            return Err(ScfError::IllegalState("update published before base"));
        }
        let sqn = inner.sqn + 1;

        inner.scratch.reset();
        inner.scratch.write_u64(sqn)?;
        inner.scratch.write_u32(entries.len() as u32)?;
        for (id, filter) in entries {
            inner.scratch.write_u64(*id)?;
            inner.scratch.write_str(filter.unwrap_or(""))?;
        }

        self.commit_aggregate(channel, is_base, sqn, inner)
    }

    /// Write the scratch buffer to the aggregate channel's base or next
    /// update key, then commit counters and metadata. Consumes the lock
    /// guard; a base commit also retires the previous epoch's update
    /// channels before the guard is released.
    fn commit_aggregate(
        &self,
        channel: &str,
        is_base: bool,
        sqn: u64,
        mut inner: parking_lot::MutexGuard<'_, Inner>,
    ) -> Result<u64, ScfError> {
        let size = inner.scratch.written_len();
        let key = if is_base {
            format!("{}B", channel)
        } else {
            // Presence checked by the caller under this same lock
            let num_updates = aggregate_info(&mut inner, channel)
                .as_ref()
                .map_or(0, |i| i.num_updates);
            format!("{}U{}", channel, num_updates + 1)
        };

        self.channel.set_attribute(&key, inner.scratch.data())?;

        let info = aggregate_info(&mut inner, channel);
        let previous = if is_base {
            info.replace(SqnInfo::new_base(sqn, size))
        } else {
            if let Some(info) = info.as_mut() {
                info.record_update(sqn, size);
            }
            None
        };
        inner.sqn = sqn;
        if let Some(previous) = previous {
            self.retire_updates(channel, previous.num_updates);
        }
        drop(inner);

        debug!(channel, sqn, is_base, "published covering filter artifact");
        Ok(sqn)
    }

    /// Delete the update channels `1..=count` left behind by the previous
    /// base epoch. Called with the publisher lock held so no concurrent
    /// publish can reuse a key being deleted. Removal failures are logged,
    /// not surfaced: the new base has already been committed and
    /// supersedes them.
    fn retire_updates(&self, prefix: &str, count: u32) {
        for k in 1..=count {
            let key = format!("{}U{}", prefix, k);
            if let Err(e) = self.channel.remove_attribute(&key) {
                warn!(key, error = %e, "failed to retire update channel");
            }
        }
    }

    /// Publish aggregated subscription statistics (own counter)
    pub fn publish_subscription_stats(&self, stats: &SubscriptionStats) -> Result<u64, ScfError> {
        let wire_version = self.wire_version;
        let mut inner = self.inner.lock();
        let sqn = inner.sqn_sub_stats + 1;
        inner.scratch.reset();
        inner.scratch.write_u64(sqn)?;
        wire::write_subscription_stats(wire_version, stats, &mut inner.scratch)?;
        self.channel.set_attribute(CHANNEL_SUB_STATS, inner.scratch.data())?;
        inner.sqn_sub_stats = sqn;
        Ok(sqn)
    }

    /// Publish per-server retained-message state digests (own counter)
    pub fn publish_retained_stats(&self, servers: &[(&str, &[u8])]) -> Result<u64, ScfError> {
        let mut inner = self.inner.lock();
        let sqn = inner.sqn_retained_stats + 1;
        inner.scratch.reset();
        inner.scratch.write_u64(sqn)?;
        inner.scratch.write_u32(servers.len() as u32)?;
        for (uid, data) in servers {
            inner.scratch.write_str(uid)?;
            inner.scratch.write_u32(data.len() as u32)?;
            inner.scratch.write_bytes(data)?;
        }
        self.channel
            .set_attribute(CHANNEL_RETAINED_STATS, inner.scratch.data())?;
        inner.sqn_retained_stats = sqn;
        Ok(sqn)
    }

    /// Publish node health/HA status bytes (own counter)
    pub fn publish_monitoring_status(&self, health: u8, ha: u8) -> Result<u64, ScfError> {
        let mut inner = self.inner.lock();
        let sqn = inner.sqn_monitoring_status + 1;
        inner.scratch.reset();
        inner.scratch.write_u64(sqn)?;
        inner.scratch.write_u8(health)?;
        inner.scratch.write_u8(ha)?;
        self.channel
            .set_attribute(CHANNEL_MONITORING, inner.scratch.data())?;
        inner.sqn_monitoring_status = sqn;
        Ok(sqn)
    }

    /// Publish the removed-servers list (own counter)
    pub fn publish_removed_servers(&self, servers: &[(&str, i64)]) -> Result<u64, ScfError> {
        let mut inner = self.inner.lock();
        let sqn = inner.sqn_removed_servers + 1;
        inner.scratch.reset();
        inner.scratch.write_u64(sqn)?;
        inner.scratch.write_i32(servers.len() as i32)?;
        for (uid, incarnation) in servers {
            inner.scratch.write_str(uid)?;
            inner.scratch.write_i64(*incarnation)?;
        }
        self.channel
            .set_attribute(CHANNEL_REMOVED_SERVERS, inner.scratch.data())?;
        inner.sqn_removed_servers = sqn;
        Ok(sqn)
    }

    /// Publish servers restored while absent from the membership view
    /// (own counter)
    pub fn publish_restored_not_in_view(
        &self,
        servers: &[(&str, &str, i64)],
    ) -> Result<u64, ScfError> {
        let mut inner = self.inner.lock();
        let sqn = inner.sqn_restored + 1;
        inner.scratch.reset();
        inner.scratch.write_u64(sqn)?;
        inner.scratch.write_i32(servers.len() as i32)?;
        for (uid, name, incarnation) in servers {
            inner.scratch.write_str(uid)?;
            inner.scratch.write_str(name)?;
            inner.scratch.write_i64(*incarnation)?;
        }
        self.channel
            .set_attribute(CHANNEL_RESTORED, inner.scratch.data())?;
        inner.sqn_restored = sqn;
        Ok(sqn)
    }

    /// Publish this node's message-forwarding endpoint (un-sequenced)
    pub fn publish_forwarding_endpoint(
        &self,
        addr: &str,
        port: i16,
        use_tls: bool,
    ) -> Result<(), ScfError> {
        let mut inner = self.inner.lock();
        inner.scratch.reset();
        inner.scratch.write_str(addr)?;
        inner.scratch.write_i16(port)?;
        inner.scratch.write_bool(use_tls)?;
        self.channel
            .set_attribute(CHANNEL_FORWARDING, inner.scratch.data())?;
        Ok(())
    }

    /// Publish this node's wire-version capabilities and name (un-sequenced)
    pub fn publish_local_server_info(
        &self,
        supported_version: i16,
        used_version: i16,
        server_name: &str,
    ) -> Result<(), ScfError> {
        let mut inner = self.inner.lock();
        inner.scratch.reset();
        inner.scratch.write_i16(supported_version)?;
        inner.scratch.write_i16(used_version)?;
        inner.scratch.write_str(server_name)?;
        self.channel
            .set_attribute(CHANNEL_SERVER_INFO, inner.scratch.data())?;
        Ok(())
    }
}

fn aggregate_info<'a>(inner: &'a mut Inner, channel: &str) -> &'a mut Option<SqnInfo> {
    if channel == CHANNEL_WCSP {
        &mut inner.wcsp
    } else {
        &mut inner.rcf
    }
}

impl fmt::Debug for ScfPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ScfPublisher")
            .field("wire_version", &self.wire_version)
            .field("sqn", &inner.sqn)
            .field("bloom_tags", &inner.bloom.len())
            .finish()
    }
}
