//! Subscription covering filter (SCF) publication
//!
//! Serializes cluster-wide subscription summaries (Bloom filters, wildcard
//! subscription patterns, regular covering filters, retained-message stats,
//! server lists) into versioned binary attribute values and hands them to
//! the membership/gossip layer, tagged with strictly increasing sequence
//! numbers so receivers can reconstruct state and discard stale updates.

mod publisher;
pub mod wire;


pub use publisher::{
    AttributeChannel, BloomFilterType, ChannelError, ScfError, ScfPublisher, SqnInfo,
    TAG_EXACT_SUB, TAG_WILDCARD_SUB,
};
pub use wire::{PatternFrequency, SubscriptionStats, WireError, SCF_WIRE_VERSION};
