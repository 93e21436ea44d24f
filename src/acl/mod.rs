//! ACL store
//!
//! A registry of named string sets used for membership tests by the selector
//! VM and by broker authorization call sites. Two-level locking: a
//! read/write lock guards the name-to-set registry (create/delete/enumerate
//! take the write lock, lookups the read lock); each set has its own mutex
//! held only for the duration of a hash lookup or insert.
//!
//! Reserved names `_0`..`_9` get an array-indexed fast path that bypasses
//! the registry lock once the set has been created normally; the selector
//! VM's `InHash` small-integer operands resolve through it.
//!
//! The store is an ordinary injectable value; [`global`] exposes the
//! process-wide instance for call sites that have no better home for one.

use std::fmt;
use std::sync::{Arc, OnceLock};

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

#[cfg(test)]
mod tests;

/// Record terminator alternatives in the bulk-load format
const RECORD_DELIMITERS: [u8; 2] = [b'\n', 0];
/// Sentinel byte opening an end-of-input record
const END_SENTINEL: u8 = 0xFF;

/// Result of a membership lookup. `NoSuchSet` is distinct from `NotFound` so
/// callers can apply their own missing-set policy (the selector VM treats it
/// as Unknown).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Found,
    NotFound,
    NoSuchSet,
}

/// Errors raised by the bulk-load parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclError {
    /// `+`/`-` record with no `@`/`:` set selected
    NoSelectedSet,
    /// Record begins with an unrecognized operator byte
    UnknownOperator(u8),
    /// Operator with an empty operand
    EmptyOperand,
    /// Record is not valid UTF-8
    InvalidUtf8,
}

impl fmt::Display for AclError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSelectedSet => write!(f, "member record before any set selection"),
            Self::UnknownOperator(op) => write!(f, "unknown ACL operator byte: 0x{:02X}", op),
            Self::EmptyOperand => write!(f, "ACL record has an empty operand"),
            Self::InvalidUtf8 => write!(f, "ACL record is not valid UTF-8"),
        }
    }
}

impl std::error::Error for AclError {}

/// A named set of strings with its own lock
pub struct AclSet {
    name: String,
    /// Member map; the bool is the mark flag used by atomic-replace loads
    members: Mutex<AHashMap<String, bool>>,
}

impl AclSet {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: Mutex::new(AHashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains(&self, key: &str) -> bool {
        self.members.lock().contains_key(key)
    }

    pub fn insert(&self, key: &str) {
        self.members.lock().insert(key.to_string(), false);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.members.lock().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    /// Flag every current member as a sweep candidate
    fn mark_all(&self) {
        for marked in self.members.lock().values_mut() {
            *marked = true;
        }
    }

    /// Drop members still flagged since `mark_all`
    fn sweep_marked(&self) {
        self.members.lock().retain(|_, marked| !*marked);
    }
}

impl fmt::Debug for AclSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AclSet")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

/// Registry of named ACL sets
pub struct AclStore {
    registry: RwLock<AHashMap<String, Arc<AclSet>>>,
    /// Fast-path slots for the reserved names `_0`..`_9`
    fast: [RwLock<Option<Arc<AclSet>>>; 10],
}

impl AclStore {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(AHashMap::new()),
            fast: Default::default(),
        }
    }

    /// Index into the fast-path array for reserved `_<digit>` names
    fn fast_slot(name: &str) -> Option<usize> {
        let bytes = name.as_bytes();
        if bytes.len() == 2 && bytes[0] == b'_' && bytes[1].is_ascii_digit() {
            Some((bytes[1] - b'0') as usize)
        } else {
            None
        }
    }

    /// Look up a set, creating it when `create` is true. Reserved names are
    /// served from the fast-path slot without touching the registry lock
    /// once populated.
    pub fn find_or_create(&self, name: &str, create: bool) -> Option<Arc<AclSet>> {
        if name.is_empty() {
            return None;
        }
        let slot = Self::fast_slot(name);
        if let Some(slot) = slot {
            if let Some(set) = self.fast[slot].read().as_ref() {
                return Some(set.clone());
            }
        }

        if let Some(set) = self.registry.read().get(name) {
            return Some(set.clone());
        }
        if !create {
            return None;
        }

        let mut registry = self.registry.write();
        let set = registry
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AclSet::new(name)))
            .clone();
        if let Some(slot) = slot {
            *self.fast[slot].write() = Some(set.clone());
        }
        Some(set)
    }

    /// Look up `key` in the named set
    pub fn check_membership(&self, key: &str, name: &str) -> Membership {
        match self.find_or_create(name, false) {
            None => Membership::NoSuchSet,
            Some(set) if set.contains(key) => Membership::Found,
            Some(_) => Membership::NotFound,
        }
    }

    /// Remove a set entirely. Lookups against it report `NoSuchSet` afterward.
    pub fn delete(&self, name: &str) -> bool {
        let removed = self.registry.write().remove(name).is_some();
        if let Some(slot) = Self::fast_slot(name) {
            *self.fast[slot].write() = None;
        }
        removed
    }

    /// Number of sets currently registered
    pub fn set_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Snapshot of registered set names
    pub fn names(&self) -> Vec<String> {
        self.registry.read().keys().cloned().collect()
    }

    /// Load a line-oriented ACL script. Records are delimited by newline or
    /// NUL; a record starting with `0xFF` ends the input. The first byte of
    /// each record selects the operator:
    ///
    /// - `/` comment
    /// - `@name` create or update the named set in place
    /// - `:name` replace the named set: existing members are marked, re-added
    ///   members unmarked, and still-marked members swept when the selection
    ///   changes or input ends
    /// - `!name` delete the named set
    /// - `+key` / `-key` add/remove a member of the selected set
    ///
    /// Replace is atomic only in its net effect: a member present in both
    /// the old and the new set is never observed absent, but a concurrent
    /// reader can observe the union of old and new members mid-replace.
    pub fn bulk_load(&self, data: &[u8]) -> Result<(), AclError> {
        let mut current: Option<Arc<AclSet>> = None;
        // Set selected by `:`, swept when deselected
        let mut replacing: Option<Arc<AclSet>> = None;
        let mut records = 0usize;

        for record in data
            .split(|b| RECORD_DELIMITERS.contains(b))
            .filter(|r| !r.is_empty())
        {
            if record[0] == END_SENTINEL {
                break;
            }
            records += 1;
            let (op, operand) = (record[0], &record[1..]);
            if op == b'/' {
                continue;
            }
            let operand = std::str::from_utf8(operand)
                .map_err(|_| AclError::InvalidUtf8)?
                .trim_end_matches('\r');
            if operand.is_empty() {
                return Err(AclError::EmptyOperand);
            }

            match op {
                b'@' | b':' | b'!' => {
                    if let Some(set) = replacing.take() {
                        set.sweep_marked();
                    }
                    match op {
                        b'@' => {
                            current = self.find_or_create(operand, true);
                        }
                        b':' => {
                            let set = self.find_or_create(operand, true);
                            if let Some(set) = set.as_ref() {
                                set.mark_all();
                            }
                            replacing.clone_from(&set);
                            current = set;
                        }
                        _ => {
                            self.delete(operand);
                            current = None;
                        }
                    }
                }
                b'+' => match current.as_ref() {
                    Some(set) => set.insert(operand),
                    None => return Err(AclError::NoSelectedSet),
                },
                b'-' => match current.as_ref() {
                    Some(set) => {
                        set.remove(operand);
                    }
                    None => return Err(AclError::NoSelectedSet),
                },
                other => return Err(AclError::UnknownOperator(other)),
            }
        }

        if let Some(set) = replacing.take() {
            set.sweep_marked();
        }
        debug!(records, sets = self.set_count(), "ACL bulk load complete");
        Ok(())
    }
}

impl Default for AclStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AclStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AclStore")
            .field("sets", &self.set_count())
            .finish()
    }
}

/// Process-wide ACL store instance
static GLOBAL_STORE: OnceLock<AclStore> = OnceLock::new();

/// Get or initialize the process-wide store. Lives until process exit.
pub fn global() -> &'static AclStore {
    GLOBAL_STORE.get_or_init(AclStore::new)
}
