//! End-to-end scenarios across the filtering engine
//!
//! These tests drive the public crate API the way the clustering control
//! component and the delivery path do: building patterns from topic
//! filters, publishing SCF artifacts to a fake membership channel, and
//! selecting messages with compiled selector programs.

use std::sync::{Arc, Once};

use ahash::AHashMap;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tracing_subscriber::EnvFilter;

use siftmq::scf::{wire, TAG_EXACT_SUB};
use siftmq::selector::{BytecodeWriter, CompareOp, MessageView, Program};
use siftmq::{
    AclStore, AttributeChannel, BinaryCursor, BloomFilterType, ChannelError, EngineConfig,
    ScfPublisher, Selection, SelectorVm, SubscriptionPattern, Value, SCF_WIRE_VERSION,
};

static TRACING: Once = Once::new();

/// Honors RUST_LOG so failing scenarios can be rerun with engine output.
fn init_tracing() {
    TRACING.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(false)
            .compact()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// In-memory membership channel: a key-value map under a lock, the way
/// the gossip layer's node state behaves.
#[derive(Default)]
struct FakeMembership {
    attributes: Mutex<AHashMap<String, Vec<u8>>>,
}

impl FakeMembership {
    fn new() -> Arc<Self> {
        Arc::new(FakeMembership::default())
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.attributes.lock().get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.attributes.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl AttributeChannel for FakeMembership {
    fn set_attribute(&self, key: &str, value: &[u8]) -> Result<(), ChannelError> {
        self.attributes.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove_attribute(&self, key: &str) -> Result<(), ChannelError> {
        self.attributes.lock().remove(key);
        Ok(())
    }
}

#[test]
fn pattern_parse_format_scenario() {
    init_tracing();
    // "sport/+/score/#" -> plus at level 2, hash at level 4
    let pattern = SubscriptionPattern::parse("sport/+/score/#").unwrap();
    assert_eq!(pattern.plus_levels(), &[2]);
    assert_eq!(pattern.hash_level(), 4);
    assert_eq!(pattern.last_level(), 4);

    let formatted = pattern
        .format_topic("sport/tennis/score/wimbledon/set1")
        .unwrap();
    assert_eq!(formatted.as_deref(), Some("sport/+/score/#"));

    // a topic that does not fit the shape yields no skeleton
    assert_eq!(pattern.format_topic("sport/tennis").unwrap(), None);
}

#[test]
fn wcsp_lifecycle_over_membership_channel() {
    init_tracing();
    let membership = FakeMembership::new();
    let publisher = ScfPublisher::new(membership.clone());

    let p7 = SubscriptionPattern::parse("sport/+/score/#").unwrap();
    let p9 = SubscriptionPattern::parse("iot/+/telemetry").unwrap();
    publisher
        .publish_wc_subscription_pattern_base(&[(7, Some(&p7)), (9, Some(&p9))])
        .unwrap();
    publisher
        .publish_wc_subscription_pattern_update(&[(7, None)])
        .unwrap();

    // replay the channel contents the way a consuming node would
    let base = membership.get("WCSPB").expect("base attribute");
    let mut reader = BinaryCursor::wrap_slice(&base);
    assert_eq!(reader.read_u64().unwrap(), 1);
    assert_eq!(reader.read_u32().unwrap(), 2);
    let mut entries = AHashMap::new();
    for _ in 0..2 {
        let id = reader.read_u64().unwrap();
        let pattern = wire::read_subscription_pattern(SCF_WIRE_VERSION, &mut reader).unwrap();
        entries.insert(id, pattern);
    }
    assert_eq!(entries[&7], p7);
    assert_eq!(entries[&9], p9);

    let update = membership.get("WCSPU1").expect("update attribute");
    let mut reader = BinaryCursor::wrap_slice(&update);
    assert_eq!(reader.read_u64().unwrap(), 2, "update continues the counter");
    assert_eq!(reader.read_u32().unwrap(), 1);
    assert_eq!(reader.read_u64().unwrap(), 7);
    let removed = wire::read_subscription_pattern(SCF_WIRE_VERSION, &mut reader).unwrap();
    assert!(removed.is_empty(), "null pattern encodes as empty = deletion");

    // a new base epoch retires the update attribute
    publisher
        .publish_wc_subscription_pattern_base(&[(9, Some(&p9))])
        .unwrap();
    assert!(membership.get("WCSPU1").is_none());
}

#[test]
fn bloom_filter_epochs_on_the_channel() {
    init_tracing();
    let membership = FakeMembership::new();
    let publisher = ScfPublisher::new(membership.clone());

    publisher
        .publish_bloom_filter_base(TAG_EXACT_SUB, BloomFilterType::Standard, 4, 64, &[0u8; 8])
        .unwrap();
    publisher
        .publish_bloom_filter_update(TAG_EXACT_SUB, &[3, 17])
        .unwrap();
    publisher
        .publish_bloom_filter_update(TAG_EXACT_SUB, &[-3])
        .unwrap();
    assert_eq!(membership.keys(), vec!["ESB", "ESU1", "ESU2"]);

    // rebase: updates retired, only the new base remains
    publisher
        .publish_bloom_filter_base(TAG_EXACT_SUB, BloomFilterType::Standard, 4, 64, &[1u8; 8])
        .unwrap();
    assert_eq!(membership.keys(), vec!["ESB"]);
    assert_eq!(publisher.sqn(), 4);
}

#[test]
fn selector_filters_delivery_by_topic_and_properties() {
    init_tracing();
    // subscription: price > 100 AND TopicPart(2) = 'orders'
    let mut w = BytecodeWriter::new();
    w.begin()
        .var("price")
        .push_int(100)
        .compare(CompareOp::Gt)
        .and()
        .topic_part(2)
        .push_string("orders")
        .compare(CompareOp::Eq)
        .end();
    let program = Program::load(&w.into_bytes()).unwrap();
    let vm = SelectorVm::new();

    let mut properties = AHashMap::new();
    properties.insert("price".to_string(), Value::Int(250));
    let selected = MessageView {
        topic: Some("acme/orders/eu"),
        properties: &properties,
    };
    assert_eq!(vm.evaluate(&program, &selected).unwrap(), Selection::True);

    let wrong_topic = MessageView {
        topic: Some("acme/returns/eu"),
        properties: &properties,
    };
    assert_eq!(vm.evaluate(&program, &wrong_topic).unwrap(), Selection::False);

    // missing property: Unknown, which the delivery path treats as
    // "do not select"
    let empty = AHashMap::new();
    let unknown = MessageView {
        topic: Some("acme/orders/eu"),
        properties: &empty,
    };
    assert_eq!(vm.evaluate(&program, &unknown).unwrap(), Selection::Unknown);
}

#[test]
fn selector_acl_gating_with_bulk_loaded_store() {
    init_tracing();
    let store = AclStore::new();
    // create g1 with k1+k2, then replace it with k2+k3
    store.bulk_load(b"@g1\n+k1\n+k2\n").unwrap();
    store.bulk_load(b":g1\n+k2\n+k3\n").unwrap();

    let mut w = BytecodeWriter::new();
    w.acl_check(&[2], "g1");
    let program = Program::load(&w.into_bytes()).unwrap();
    let vm = SelectorVm::new().with_acl_store(&store);

    let properties = AHashMap::new();
    for (topic, expected) in [
        ("org/k1/data", Selection::False),
        ("org/k2/data", Selection::True),
        ("org/k3/data", Selection::True),
    ] {
        let view = MessageView {
            topic: Some(topic),
            properties: &properties,
        };
        assert_eq!(vm.evaluate(&program, &view).unwrap(), expected, "{topic}");
    }
}

#[test]
fn engine_config_from_toml_feeds_both_components() {
    init_tracing();
    let config = EngineConfig::from_toml_str(
        r#"
        [selector]
        max_stack_depth = 8

        [scf]
        scratch_capacity = 4096
        "#,
    )
    .unwrap();
    config.validate().unwrap();

    // the configured bound is enforced
    let mut w = BytecodeWriter::new();
    for _ in 0..9 {
        w.push_int(1);
    }
    let program = Program::load(&w.into_bytes()).unwrap();
    let vm = SelectorVm::with_config(&config.selector);
    let properties: AHashMap<String, Value> = AHashMap::new();
    assert!(vm.evaluate(&program, &properties).is_err());

    // the publisher accepts its section
    let publisher = ScfPublisher::with_config(FakeMembership::new(), &config.scf).unwrap();
    assert_eq!(publisher.sqn(), 0);
}

#[test]
fn cursor_checksummed_artifact_round_trip() {
    init_tracing();
    // build an artifact, append its checksum, verify on the read side
    let mut cursor = BinaryCursor::new();
    cursor.write_u64(42).unwrap();
    cursor.write_str("payload").unwrap();
    let sum = cursor.checksum(0).unwrap();
    cursor.write_u32(sum).unwrap();

    let mut reader = cursor.freeze();
    let body_sum = reader.checksum(4).unwrap();
    assert_eq!(reader.read_u64().unwrap(), 42);
    assert_eq!(reader.read_str().unwrap(), "payload");
    assert_eq!(reader.read_u32().unwrap(), body_sum);
}
