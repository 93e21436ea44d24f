use std::sync::Arc;

use super::*;

#[test]
fn test_find_or_create_semantics() {
    let store = AclStore::new();
    assert!(store.find_or_create("g1", false).is_none());

    let set = store.find_or_create("g1", true).unwrap();
    set.insert("alice");
    // Second lookup pins the same set
    let again = store.find_or_create("g1", false).unwrap();
    assert!(Arc::ptr_eq(&set, &again));
    assert_eq!(store.set_count(), 1);

    assert!(store.find_or_create("", true).is_none());
}

#[test]
fn test_check_membership_three_outcomes() {
    let store = AclStore::new();
    assert_eq!(store.check_membership("k", "missing"), Membership::NoSuchSet);

    let set = store.find_or_create("g1", true).unwrap();
    set.insert("k");
    assert_eq!(store.check_membership("k", "g1"), Membership::Found);
    assert_eq!(store.check_membership("other", "g1"), Membership::NotFound);
}

#[test]
fn test_delete_set() {
    let store = AclStore::new();
    store.find_or_create("g1", true).unwrap().insert("k");
    assert!(store.delete("g1"));
    assert!(!store.delete("g1"));
    assert_eq!(store.check_membership("k", "g1"), Membership::NoSuchSet);
}

#[test]
fn test_reserved_name_fast_path() {
    let store = AclStore::new();
    // Fast path is only populated by a normal create
    assert!(store.find_or_create("_3", false).is_none());

    let set = store.find_or_create("_3", true).unwrap();
    set.insert("k");
    let fast = store.find_or_create("_3", false).unwrap();
    assert!(Arc::ptr_eq(&set, &fast));

    // Delete clears the slot too
    store.delete("_3");
    assert!(store.find_or_create("_3", false).is_none());

    // Only exactly _<digit> is reserved
    assert_eq!(AclStore::fast_slot("_a"), None);
    assert_eq!(AclStore::fast_slot("_10"), None);
    assert_eq!(AclStore::fast_slot("_0"), Some(0));
    assert_eq!(AclStore::fast_slot("_9"), Some(9));
}

#[test]
fn test_bulk_load_create_and_members() {
    let store = AclStore::new();
    store
        .bulk_load(b"/ seeded groups\n@g1\n+k1\n+k2\n-k1\n")
        .unwrap();
    assert_eq!(store.check_membership("k1", "g1"), Membership::NotFound);
    assert_eq!(store.check_membership("k2", "g1"), Membership::Found);
}

#[test]
fn test_bulk_load_replace_is_mark_sweep() {
    let store = AclStore::new();
    store.bulk_load(b"@g1\n+k1\n+k2\n").unwrap();
    store.bulk_load(b":g1\n+k2\n+k3\n").unwrap();

    assert_eq!(store.check_membership("k1", "g1"), Membership::NotFound);
    assert_eq!(store.check_membership("k2", "g1"), Membership::Found);
    assert_eq!(store.check_membership("k3", "g1"), Membership::Found);
    assert_eq!(store.find_or_create("g1", false).unwrap().len(), 2);
}

#[test]
fn test_bulk_load_replace_sweeps_on_set_switch() {
    let store = AclStore::new();
    store.bulk_load(b"@g1\n+old\n").unwrap();
    // Switching to g2 mid-load must still sweep g1's unreplaced members
    store.bulk_load(b":g1\n+new\n@g2\n+x\n").unwrap();
    assert_eq!(store.check_membership("old", "g1"), Membership::NotFound);
    assert_eq!(store.check_membership("new", "g1"), Membership::Found);
    assert_eq!(store.check_membership("x", "g2"), Membership::Found);
}

#[test]
fn test_bulk_load_delete_set() {
    let store = AclStore::new();
    store.bulk_load(b"@g1\n+k\n!g1\n").unwrap();
    assert_eq!(store.check_membership("k", "g1"), Membership::NoSuchSet);
}

#[test]
fn test_bulk_load_nul_delimiters_and_sentinel() {
    let store = AclStore::new();
    let mut data = Vec::new();
    data.extend_from_slice(b"@g1\0+k1\0");
    data.push(0);
    data.push(0xFF);
    // Anything after the sentinel record is ignored
    data.extend_from_slice(b"+ignored\n");
    store.bulk_load(&data).unwrap();
    assert_eq!(store.check_membership("k1", "g1"), Membership::Found);
    assert_eq!(store.check_membership("ignored", "g1"), Membership::NotFound);
}

#[test]
fn test_bulk_load_errors() {
    let store = AclStore::new();
    assert_eq!(store.bulk_load(b"+k1\n"), Err(AclError::NoSelectedSet));
    assert_eq!(store.bulk_load(b"?g1\n"), Err(AclError::UnknownOperator(b'?')));
    assert_eq!(store.bulk_load(b"@\n"), Err(AclError::EmptyOperand));
}

#[test]
fn test_global_store() {
    let store = global();
    let name = "test-global-acl-set";
    store.find_or_create(name, true).unwrap().insert("k");
    assert_eq!(store.check_membership("k", name), Membership::Found);
    store.delete(name);
}
