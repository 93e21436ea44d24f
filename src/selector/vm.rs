//! Stack evaluator for loaded selector programs

use ahash::AHashMap;
use smallvec::SmallVec;
use std::fmt;

use crate::acl::{AclStore, Membership};
use crate::config::SelectorConfig;

use super::like::like_match;
use super::program::{Instr, IsTarget, Program};
use super::value::{compare, CompareOp, Tri, Value};

/// Property name the topic is published under when the message header
/// does not carry one
pub const TOPIC_PROPERTY: &str = "Topic";

/// Outcome of evaluating a selector against one message. Only `True`
/// selects the message; `Unknown` means "do not select" without meaning
/// "explicitly excluded".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    True,
    False,
    Unknown,
}

impl From<Tri> for Selection {
    fn from(tri: Tri) -> Self {
        match tri {
            Tri::True => Selection::True,
            Tri::False => Selection::False,
            Tri::Unknown => Selection::Unknown,
        }
    }
}

/// Internal invariant violations. Data-shape problems in the message
/// never land here; they degrade to [`Selection::Unknown`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// Expression nesting exceeded the configured stack bound
    StackOverflow,
    /// The program popped more values than it pushed
    StackUnderflow,
    /// The program finished with other than one value on the stack
    UnbalancedResult,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::StackOverflow => write!(f, "selector stack overflow"),
            VmError::StackUnderflow => write!(f, "selector stack underflow"),
            VmError::UnbalancedResult => write!(f, "selector left an unbalanced stack"),
        }
    }
}

impl std::error::Error for VmError {}

/// Read access to the message a selector runs against.
///
/// Implementations must be safe for concurrent reads; evaluation itself
/// keeps no shared state, so one program can be evaluated from many
/// threads at once.
pub trait PropertySource {
    /// Look up a property by name; `None` when absent or unresolvable
    fn property(&self, name: &str) -> Option<Value>;

    /// The message topic, when the header carries one. The default
    /// falls back to the `Topic` property at evaluation time.
    fn topic(&self) -> Option<&str> {
        None
    }
}

impl PropertySource for AHashMap<String, Value> {
    fn property(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// A property map paired with a header topic
#[derive(Debug)]
pub struct MessageView<'a> {
    pub topic: Option<&'a str>,
    pub properties: &'a AHashMap<String, Value>,
}

impl PropertySource for MessageView<'_> {
    fn property(&self, name: &str) -> Option<Value> {
        self.properties.get(name).cloned()
    }

    fn topic(&self) -> Option<&str> {
        self.topic
    }
}

/// Selector evaluator. Stateless across calls; cheap to construct and
/// share.
#[derive(Debug, Clone, Copy)]
pub struct SelectorVm<'a> {
    max_stack_depth: usize,
    acl: Option<&'a AclStore>,
}

impl Default for SelectorVm<'_> {
    fn default() -> Self {
        SelectorVm {
            max_stack_depth: SelectorConfig::default().max_stack_depth,
            acl: None,
        }
    }
}

impl<'a> SelectorVm<'a> {
    pub fn new() -> Self {
        SelectorVm::default()
    }

    pub fn with_config(config: &SelectorConfig) -> Self {
        SelectorVm {
            max_stack_depth: config.max_stack_depth,
            acl: None,
        }
    }

    /// Route AclCheck/InHash lookups to `store` instead of the
    /// process-wide registry
    pub fn with_acl_store(mut self, store: &'a AclStore) -> Self {
        self.acl = Some(store);
        self
    }

    fn acl(&self) -> &AclStore {
        self.acl.unwrap_or_else(|| crate::acl::global())
    }

    /// Evaluate `program` against one message. An empty program selects
    /// everything; this is the universal-subscription fast path.
    pub fn evaluate(
        &self,
        program: &Program,
        source: &dyn PropertySource,
    ) -> Result<Selection, VmError> {
        if program.is_empty() {
            return Ok(Selection::True);
        }
        let mut eval = Eval {
            vm: self,
            source,
            stack: SmallVec::new(),
            // resolved lazily; outer None means "not looked up yet"
            topic: None,
            pending: SmallVec::new(),
        };
        eval.run(program.instrs())
    }
}

/// A conjunction whose left side was Unknown: the right side still runs,
/// and the results combine at the recorded End index
struct PendingCombine {
    end: usize,
    is_and: bool,
}

struct Eval<'a, 'b> {
    vm: &'a SelectorVm<'a>,
    source: &'b dyn PropertySource,
    stack: SmallVec<[Value; 16]>,
    topic: Option<Option<String>>,
    pending: SmallVec<[PendingCombine; 4]>,
}

impl Eval<'_, '_> {
    fn run(&mut self, instrs: &[Instr]) -> Result<Selection, VmError> {
        let mut pc = 0;
        while pc < instrs.len() {
            match &instrs[pc] {
                Instr::Begin => {}
                Instr::End => self.combine_pending(pc)?,
                Instr::PushBool(v) => self.push(Value::Bool(*v))?,
                Instr::PushInt(v) => self.push(Value::Int(*v))?,
                Instr::PushLong(v) => self.push(Value::Long(*v))?,
                Instr::PushFloat(v) => self.push(Value::Float(*v))?,
                Instr::PushDouble(v) => self.push(Value::Double(*v))?,
                Instr::PushString(v) => self.push(Value::Str(v.clone()))?,
                Instr::Var(name) => {
                    let v = self.source.property(name).unwrap_or(Value::Null);
                    self.push(v)?;
                }
                Instr::Compare(op) => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    self.push(Value::from_tri(compare(*op, &left, &right)))?;
                }
                Instr::And { end } => {
                    match self.pop()?.as_tri() {
                        // short-circuit: the right side must not run
                        Tri::False => {
                            self.push(Value::Bool(false))?;
                            pc = *end;
                            continue;
                        }
                        // the right side's value becomes the result
                        Tri::True => {}
                        Tri::Unknown => self.pending.push(PendingCombine {
                            end: *end,
                            is_and: true,
                        }),
                    }
                }
                Instr::Or { end } => match self.pop()?.as_tri() {
                    Tri::True => {
                        self.push(Value::Bool(true))?;
                        pc = *end;
                        continue;
                    }
                    Tri::False => {}
                    Tri::Unknown => self.pending.push(PendingCombine {
                        end: *end,
                        is_and: false,
                    }),
                },
                Instr::Not => {
                    let v = self.pop()?;
                    self.push(Value::from_tri(v.as_tri().not()))?;
                }
                Instr::Is { target, negate } => {
                    let v = self.pop()?;
                    let hit = match target {
                        // empty string counts as null by selector rules
                        IsTarget::Null => match &v {
                            Value::Null => true,
                            Value::Str(s) => s.is_empty(),
                            _ => false,
                        },
                        IsTarget::True => v == Value::Bool(true),
                        IsTarget::False => v == Value::Bool(false),
                    };
                    self.push(Value::Bool(hit != *negate))?;
                }
                Instr::Between => {
                    let hi = self.pop()?;
                    let lo = self.pop()?;
                    let x = self.pop()?;
                    let r = compare(CompareOp::Ge, &x, &lo).and(compare(CompareOp::Le, &x, &hi));
                    self.push(Value::from_tri(r))?;
                }
                Instr::In(items) => {
                    let v = self.pop()?;
                    let r = match &v {
                        Value::Str(s) => Value::Bool(items.iter().any(|i| i == s)),
                        _ => Value::Null,
                    };
                    self.push(r)?;
                }
                Instr::Like(pattern) => {
                    let v = self.pop()?;
                    let r = match &v {
                        Value::Str(s) => Value::Bool(like_match(pattern, s.as_bytes())),
                        _ => Value::Null,
                    };
                    self.push(r)?;
                }
                Instr::AclCheck { levels, set } => {
                    let r = self.acl_check(levels, set);
                    self.push(r)?;
                }
                Instr::InHash => {
                    let set = self.pop()?;
                    let key = self.pop()?;
                    let r = self.in_hash(&key, &set);
                    self.push(r)?;
                }
                Instr::Topic => {
                    let r = match self.resolve_topic() {
                        Some(t) => Value::Str(t.to_owned()),
                        None => Value::Null,
                    };
                    self.push(r)?;
                }
                Instr::TopicPart(level) => {
                    let level = *level as usize;
                    let r = match self.resolve_topic() {
                        Some(t) => match t.split('/').nth(level - 1) {
                            Some(part) => Value::Str(part.to_owned()),
                            None => Value::Null,
                        },
                        None => Value::Null,
                    };
                    self.push(r)?;
                }
            }
            pc += 1;
        }
        // top-level conjunctions combine at the virtual End past the
        // last instruction
        self.combine_pending(instrs.len())?;
        if self.stack.len() != 1 || !self.pending.is_empty() {
            return Err(VmError::UnbalancedResult);
        }
        Ok(self.stack[0].as_tri().into())
    }

    fn push(&mut self, v: Value) -> Result<(), VmError> {
        if self.stack.len() >= self.vm.max_stack_depth {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(v);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Fold Unknown-left conjunctions targeted at this End, innermost
    /// first, so `AND(Unknown, False) = False` and `OR(Unknown, True) =
    /// True` come out right even though the left side never produced a
    /// determinate value.
    fn combine_pending(&mut self, end: usize) -> Result<(), VmError> {
        while let Some(p) = self.pending.last() {
            if p.end != end {
                break;
            }
            let is_and = p.is_and;
            self.pending.pop();
            let right = self.pop()?.as_tri();
            let combined = if is_and {
                Tri::Unknown.and(right)
            } else {
                Tri::Unknown.or(right)
            };
            self.push(Value::from_tri(combined))?;
        }
        Ok(())
    }

    fn resolve_topic(&mut self) -> Option<&str> {
        if self.topic.is_none() {
            let resolved = match self.source.topic() {
                Some(t) => Some(t.to_owned()),
                None => match self.source.property(TOPIC_PROPERTY) {
                    Some(Value::Str(t)) => Some(t),
                    _ => None,
                },
            };
            self.topic = Some(resolved);
        }
        self.topic.as_ref().and_then(|t| t.as_deref())
    }

    fn acl_check(&mut self, levels: &[u8], set: &str) -> Value {
        // key construction scoped so the topic borrow ends before the
        // store lookup
        let key = {
            let Some(topic) = self.resolve_topic() else {
                return Value::Null;
            };
            let parts: SmallVec<[&str; 8]> = topic.split('/').collect();
            let mut key = String::new();
            for (i, &level) in levels.iter().enumerate() {
                let Some(part) = parts.get(level as usize - 1) else {
                    return Value::Null;
                };
                if i > 0 {
                    key.push('/');
                }
                key.push_str(part);
            }
            key
        };
        let store = self.vm.acl();
        membership_value(store.check_membership(&key, set))
    }

    fn in_hash(&mut self, key: &Value, set: &Value) -> Value {
        let set_name = match set {
            Value::Str(s) => s.clone(),
            // reserved fast-path names, no registry lock on lookup
            Value::Int(k @ 0..=9) => format!("_{k}"),
            _ => return Value::Null,
        };
        let Value::Str(key) = key else {
            return Value::Null;
        };
        let store = self.vm.acl();
        membership_value(store.check_membership(key, &set_name))
    }
}

fn membership_value(m: Membership) -> Value {
    match m {
        Membership::Found => Value::Bool(true),
        Membership::NotFound => Value::Bool(false),
        Membership::NoSuchSet => Value::Null,
    }
}
