//! Compiled selector program loading
//!
//! The selector compiler lives elsewhere in the broker; this module owns
//! the bytecode contract it emits. Every instruction carries a fixed
//! four-byte header `{op: u8, kind: u8, len: u16 BE}` followed by `len`
//! operand bytes; operand payloads are big-endian. [`Program::load`]
//! decodes the stream once into typed instructions and resolves every
//! And/Or short-circuit jump to the index of its matching `End`, so the
//! evaluator never rescans the stream to skip an operand.

use std::fmt;

use super::like::{WILDCARD_MANY, WILDCARD_ONE};
use super::value::CompareOp;

/// Instruction header size in bytes
const HEADER_LEN: usize = 4;

/// Upper bound on one instruction's operand payload
pub const MAX_OPERAND_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    /// Unrecognized opcode byte at the given stream offset
    UnknownOpcode { opcode: u8, offset: usize },
    /// The stream ended inside a header or operand
    Truncated,
    /// An operand's length or content does not match its opcode
    InvalidOperand(&'static str),
    /// More `End` markers than `Begin` markers, or vice versa
    UnbalancedNesting,
}

impl fmt::Display for ProgramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramError::UnknownOpcode { opcode, offset } => {
                write!(f, "unknown opcode 0x{opcode:02x} at offset {offset}")
            }
            ProgramError::Truncated => write!(f, "bytecode stream truncated"),
            ProgramError::InvalidOperand(what) => write!(f, "invalid operand: {what}"),
            ProgramError::UnbalancedNesting => write!(f, "unbalanced Begin/End nesting"),
        }
    }
}

impl std::error::Error for ProgramError {}

/// Opcode byte values of the compiled selector language
pub mod opcode {
    pub const BEGIN: u8 = 0x01;
    pub const END: u8 = 0x02;
    pub const BOOL: u8 = 0x03;
    pub const INT: u8 = 0x04;
    pub const LONG: u8 = 0x05;
    pub const FLOAT: u8 = 0x06;
    pub const DOUBLE: u8 = 0x07;
    pub const STRING: u8 = 0x08;
    pub const SMALL_INT: u8 = 0x09;
    pub const VAR: u8 = 0x0A;
    pub const COMPARE: u8 = 0x0B;
    pub const AND: u8 = 0x0C;
    pub const OR: u8 = 0x0D;
    pub const NOT: u8 = 0x0E;
    pub const IS: u8 = 0x0F;
    pub const BETWEEN: u8 = 0x10;
    pub const IN: u8 = 0x11;
    pub const LIKE: u8 = 0x12;
    pub const ACL_CHECK: u8 = 0x13;
    pub const IN_HASH: u8 = 0x14;
    pub const TOPIC: u8 = 0x15;
    pub const TOPIC_PART: u8 = 0x16;
}

/// Target of an `Is` test; the kind byte's low nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsTarget {
    Null,
    True,
    False,
}

/// Negation flag bit in the `Is` kind byte
pub const IS_NEGATE: u8 = 0x10;

/// A decoded instruction with its operands materialized
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Begin,
    End,
    PushBool(bool),
    PushInt(i32),
    PushLong(i64),
    PushFloat(f32),
    PushDouble(f64),
    PushString(String),
    /// Property lookup by name
    Var(String),
    Compare(CompareOp),
    /// `end` is the instruction index of the matching End marker
    /// (or one past the stream for a top-level conjunction)
    And { end: usize },
    Or { end: usize },
    Not,
    Is { target: IsTarget, negate: bool },
    Between,
    /// Inline membership list, decoded from length-prefixed strings
    In(Vec<String>),
    /// Rewritten pattern bytes with 0xFF/0xFE wildcards
    Like(Vec<u8>),
    /// Topic-level ACL membership test
    AclCheck { levels: Vec<u8>, set: String },
    InHash,
    Topic,
    /// 1-based index of the topic level to extract
    TopicPart(u8),
}

/// A loaded, jump-resolved selector program
#[derive(Debug, Clone, Default)]
pub struct Program {
    instrs: Vec<Instr>,
}

impl Program {
    /// The always-select program; an absent selector compiles to this
    pub fn empty() -> Self {
        Program::default()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub(super) fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    /// Decode a compiled bytecode stream. Validates every header and
    /// operand up front and resolves And/Or jump targets, so evaluation
    /// needs no further structural checks.
    pub fn load(bytes: &[u8]) -> Result<Program, ProgramError> {
        let mut instrs = Vec::new();
        // pending And/Or indices per open Begin group; slot 0 is the
        // implicit top-level group, resolved to one past the stream
        let mut groups: Vec<Vec<usize>> = vec![Vec::new()];
        let mut pos = 0;

        while pos < bytes.len() {
            if bytes.len() - pos < HEADER_LEN {
                return Err(ProgramError::Truncated);
            }
            let op = bytes[pos];
            let kind = bytes[pos + 1];
            let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
            pos += HEADER_LEN;
            if bytes.len() - pos < len {
                return Err(ProgramError::Truncated);
            }
            let operand = &bytes[pos..pos + len];
            let offset = pos - HEADER_LEN;
            pos += len;

            let instr = match op {
                opcode::BEGIN => {
                    groups.push(Vec::new());
                    Instr::Begin
                }
                opcode::END => {
                    let pending = groups.pop().ok_or(ProgramError::UnbalancedNesting)?;
                    if groups.is_empty() {
                        return Err(ProgramError::UnbalancedNesting);
                    }
                    let end_idx = instrs.len();
                    for idx in pending {
                        patch_jump(&mut instrs, idx, end_idx);
                    }
                    Instr::End
                }
                opcode::BOOL => Instr::PushBool(kind != 0),
                opcode::INT => Instr::PushInt(i32::from_be_bytes(fixed(operand)?)),
                opcode::LONG => Instr::PushLong(i64::from_be_bytes(fixed(operand)?)),
                opcode::FLOAT => Instr::PushFloat(f32::from_be_bytes(fixed(operand)?)),
                opcode::DOUBLE => Instr::PushDouble(f64::from_be_bytes(fixed(operand)?)),
                opcode::STRING => Instr::PushString(utf8(operand)?),
                opcode::SMALL_INT => Instr::PushInt(kind as i8 as i32),
                opcode::VAR => {
                    if operand.is_empty() {
                        return Err(ProgramError::InvalidOperand("empty property name"));
                    }
                    Instr::Var(utf8(operand)?)
                }
                opcode::COMPARE => Instr::Compare(
                    CompareOp::from_u8(kind)
                        .ok_or(ProgramError::InvalidOperand("comparison operator"))?,
                ),
                opcode::AND | opcode::OR => {
                    let idx = instrs.len();
                    groups
                        .last_mut()
                        .ok_or(ProgramError::UnbalancedNesting)?
                        .push(idx);
                    // placeholder target, patched at the matching End
                    if op == opcode::AND {
                        Instr::And { end: usize::MAX }
                    } else {
                        Instr::Or { end: usize::MAX }
                    }
                }
                opcode::NOT => Instr::Not,
                opcode::IS => {
                    let target = match kind & 0x0F {
                        0 => IsTarget::Null,
                        1 => IsTarget::True,
                        2 => IsTarget::False,
                        _ => return Err(ProgramError::InvalidOperand("Is target")),
                    };
                    Instr::Is {
                        target,
                        negate: kind & IS_NEGATE != 0,
                    }
                }
                opcode::BETWEEN => Instr::Between,
                opcode::IN => Instr::In(decode_string_list(operand)?),
                opcode::LIKE => Instr::Like(operand.to_vec()),
                opcode::ACL_CHECK => {
                    let (levels, set) = decode_acl_operand(operand)?;
                    Instr::AclCheck { levels, set }
                }
                opcode::IN_HASH => Instr::InHash,
                opcode::TOPIC => Instr::Topic,
                opcode::TOPIC_PART => {
                    if kind == 0 {
                        return Err(ProgramError::InvalidOperand("topic level index"));
                    }
                    Instr::TopicPart(kind)
                }
                other => {
                    return Err(ProgramError::UnknownOpcode {
                        opcode: other,
                        offset,
                    })
                }
            };
            instrs.push(instr);
        }

        if groups.len() != 1 {
            return Err(ProgramError::UnbalancedNesting);
        }
        // top-level conjunctions jump past the last instruction
        let end_idx = instrs.len();
        for idx in groups.pop().unwrap_or_default() {
            patch_jump(&mut instrs, idx, end_idx);
        }
        Ok(Program { instrs })
    }
}

fn patch_jump(instrs: &mut [Instr], idx: usize, end: usize) {
    match &mut instrs[idx] {
        Instr::And { end: slot } | Instr::Or { end: slot } => *slot = end,
        _ => unreachable!("jump patch targets only And/Or"),
    }
}

fn fixed<const N: usize>(operand: &[u8]) -> Result<[u8; N], ProgramError> {
    operand
        .try_into()
        .map_err(|_| ProgramError::InvalidOperand("literal width"))
}

fn utf8(operand: &[u8]) -> Result<String, ProgramError> {
    String::from_utf8(operand.to_vec()).map_err(|_| ProgramError::InvalidOperand("utf-8 string"))
}

/// In-list operand: `u16 count`, then `count` entries of `u16 len` + bytes
fn decode_string_list(operand: &[u8]) -> Result<Vec<String>, ProgramError> {
    if operand.len() < 2 {
        return Err(ProgramError::InvalidOperand("In list header"));
    }
    let count = u16::from_be_bytes([operand[0], operand[1]]) as usize;
    let mut items = Vec::with_capacity(count);
    let mut pos = 2;
    for _ in 0..count {
        if operand.len() - pos < 2 {
            return Err(ProgramError::InvalidOperand("In list entry"));
        }
        let len = u16::from_be_bytes([operand[pos], operand[pos + 1]]) as usize;
        pos += 2;
        if operand.len() - pos < len {
            return Err(ProgramError::InvalidOperand("In list entry"));
        }
        items.push(utf8(&operand[pos..pos + len])?);
        pos += len;
    }
    if pos != operand.len() {
        return Err(ProgramError::InvalidOperand("In list trailing bytes"));
    }
    Ok(items)
}

/// AclCheck operand: `u8 numLevels`, that many 1-based level indices,
/// then the set name
fn decode_acl_operand(operand: &[u8]) -> Result<(Vec<u8>, String), ProgramError> {
    let (&num, rest) = operand
        .split_first()
        .ok_or(ProgramError::InvalidOperand("AclCheck header"))?;
    let num = num as usize;
    if rest.len() < num {
        return Err(ProgramError::InvalidOperand("AclCheck levels"));
    }
    let levels = rest[..num].to_vec();
    if levels.iter().any(|&l| l == 0) {
        return Err(ProgramError::InvalidOperand("AclCheck level index"));
    }
    let set = utf8(&rest[num..])?;
    if set.is_empty() {
        return Err(ProgramError::InvalidOperand("AclCheck set name"));
    }
    Ok((levels, set))
}

/// Emits instruction streams in the compiled wire form. The real
/// compiler lives with the protocol front end; this writer covers
/// programmatic construction and tests.
#[derive(Debug, Default)]
pub struct BytecodeWriter {
    buf: Vec<u8>,
}

impl BytecodeWriter {
    pub fn new() -> Self {
        BytecodeWriter::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn emit(&mut self, op: u8, kind: u8, operand: &[u8]) -> &mut Self {
        debug_assert!(operand.len() <= MAX_OPERAND_LEN);
        self.buf.push(op);
        self.buf.push(kind);
        self.buf
            .extend_from_slice(&(operand.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(operand);
        self
    }

    pub fn begin(&mut self) -> &mut Self {
        self.emit(opcode::BEGIN, 0, &[])
    }

    pub fn end(&mut self) -> &mut Self {
        self.emit(opcode::END, 0, &[])
    }

    pub fn push_bool(&mut self, v: bool) -> &mut Self {
        self.emit(opcode::BOOL, v as u8, &[])
    }

    pub fn push_int(&mut self, v: i32) -> &mut Self {
        self.emit(opcode::INT, 0, &v.to_be_bytes())
    }

    pub fn push_long(&mut self, v: i64) -> &mut Self {
        self.emit(opcode::LONG, 0, &v.to_be_bytes())
    }

    pub fn push_float(&mut self, v: f32) -> &mut Self {
        self.emit(opcode::FLOAT, 0, &v.to_be_bytes())
    }

    pub fn push_double(&mut self, v: f64) -> &mut Self {
        self.emit(opcode::DOUBLE, 0, &v.to_be_bytes())
    }

    pub fn push_string(&mut self, v: &str) -> &mut Self {
        self.emit(opcode::STRING, 0, v.as_bytes())
    }

    pub fn push_small_int(&mut self, v: i8) -> &mut Self {
        self.emit(opcode::SMALL_INT, v as u8, &[])
    }

    pub fn var(&mut self, name: &str) -> &mut Self {
        self.emit(opcode::VAR, 0, name.as_bytes())
    }

    pub fn compare(&mut self, op: CompareOp) -> &mut Self {
        let kind = match op {
            CompareOp::Eq => 0,
            CompareOp::Lt => 1,
            CompareOp::Gt => 2,
            CompareOp::Ne => 3,
            CompareOp::Le => 4,
            CompareOp::Ge => 5,
        };
        self.emit(opcode::COMPARE, kind, &[])
    }

    pub fn and(&mut self) -> &mut Self {
        self.emit(opcode::AND, 0, &[])
    }

    pub fn or(&mut self) -> &mut Self {
        self.emit(opcode::OR, 0, &[])
    }

    pub fn not(&mut self) -> &mut Self {
        self.emit(opcode::NOT, 0, &[])
    }

    pub fn is(&mut self, target: IsTarget, negate: bool) -> &mut Self {
        let mut kind = match target {
            IsTarget::Null => 0,
            IsTarget::True => 1,
            IsTarget::False => 2,
        };
        if negate {
            kind |= IS_NEGATE;
        }
        self.emit(opcode::IS, kind, &[])
    }

    pub fn between(&mut self) -> &mut Self {
        self.emit(opcode::BETWEEN, 0, &[])
    }

    pub fn in_list(&mut self, items: &[&str]) -> &mut Self {
        let mut operand = Vec::new();
        operand.extend_from_slice(&(items.len() as u16).to_be_bytes());
        for item in items {
            operand.extend_from_slice(&(item.len() as u16).to_be_bytes());
            operand.extend_from_slice(item.as_bytes());
        }
        self.emit(opcode::IN, 0, &operand)
    }

    /// Rewrites `%` and `_` to the reserved wildcard bytes, the way the
    /// compiler does after stripping escapes
    pub fn like(&mut self, pattern: &str) -> &mut Self {
        let rewritten: Vec<u8> = pattern
            .bytes()
            .map(|b| match b {
                b'%' => WILDCARD_MANY,
                b'_' => WILDCARD_ONE,
                b => b,
            })
            .collect();
        self.emit(opcode::LIKE, 0, &rewritten)
    }

    pub fn acl_check(&mut self, levels: &[u8], set: &str) -> &mut Self {
        let mut operand = vec![levels.len() as u8];
        operand.extend_from_slice(levels);
        operand.extend_from_slice(set.as_bytes());
        self.emit(opcode::ACL_CHECK, 0, &operand)
    }

    pub fn in_hash(&mut self) -> &mut Self {
        self.emit(opcode::IN_HASH, 0, &[])
    }

    pub fn topic(&mut self) -> &mut Self {
        self.emit(opcode::TOPIC, 0, &[])
    }

    pub fn topic_part(&mut self, level: u8) -> &mut Self {
        self.emit(opcode::TOPIC_PART, level, &[])
    }
}
