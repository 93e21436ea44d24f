//! SiftMQ - clustered MQTT broker filtering engine
//!
//! The subscription covering filter (SCF) publication protocol and the
//! message selector engine of a clustered broker: serializing Bloom
//! filters, wildcard subscription patterns and covering filters into
//! sequence-numbered artifacts on the membership channel, and evaluating
//! compiled selector expressions against messages with SQL tri-state
//! semantics.

pub mod acl;
pub mod config;
pub mod cursor;
pub mod extension;
pub mod pattern;
pub mod scf;
pub mod selector;

pub use acl::{AclError, AclSet, AclStore, Membership};
pub use config::{EngineConfig, ScfConfig, SelectorConfig};
pub use cursor::{BinaryCursor, CursorError};
pub use extension::{Extension, ExtensionError, ExtensionId, ExtensionKind, ExtensionValue};
pub use pattern::{PatternError, SubscriptionPattern};
pub use scf::{
    AttributeChannel, BloomFilterType, ChannelError, ScfError, ScfPublisher, SqnInfo,
    SCF_WIRE_VERSION,
};
pub use selector::{Program, PropertySource, Selection, SelectorVm, Value};
