//! Message selector engine
//!
//! Subscriptions may carry a compiled SQL-92-style selector expression;
//! this module evaluates it against each published message. The compiler
//! front end emits a linear bytecode stream ([`program`]), which loads
//! once per subscription and is then evaluated per message by a stack
//! machine ([`vm`]) under SQL tri-state null semantics: a missing or
//! mistyped property makes the result Unknown, and Unknown messages are
//! simply not selected. Evaluation never fails on message content.

mod like;
mod program;
mod value;
mod vm;

pub use like::{like_match, WILDCARD_MANY, WILDCARD_ONE};
pub use program::{BytecodeWriter, Instr, IsTarget, Program, ProgramError};
pub use value::{compare, CompareOp, Tri, Value};
pub use vm::{MessageView, PropertySource, Selection, SelectorVm, VmError, TOPIC_PROPERTY};
