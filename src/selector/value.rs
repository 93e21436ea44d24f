//! Tagged values and tri-state logic for selector evaluation
//!
//! Message properties and literals are carried as [`Value`] variants;
//! logical results are the SQL tri-state [`Tri`]. Comparisons between
//! numeric values promote both sides up a fixed ladder before comparing;
//! any pairing the ladder does not cover compares to `Unknown`, never an
//! error, so a malformed property can never break message delivery.

use std::cmp::Ordering;

/// SQL tri-state logical value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tri {
    True,
    False,
    Unknown,
}

impl Tri {
    pub fn from_bool(b: bool) -> Self {
        if b {
            Tri::True
        } else {
            Tri::False
        }
    }

    /// SQL AND: False dominates, Unknown absorbs the rest
    pub fn and(self, rhs: Tri) -> Tri {
        match (self, rhs) {
            (Tri::False, _) | (_, Tri::False) => Tri::False,
            (Tri::True, Tri::True) => Tri::True,
            _ => Tri::Unknown,
        }
    }

    /// SQL OR: True dominates, Unknown absorbs the rest
    pub fn or(self, rhs: Tri) -> Tri {
        match (self, rhs) {
            (Tri::True, _) | (_, Tri::True) => Tri::True,
            (Tri::False, Tri::False) => Tri::False,
            _ => Tri::Unknown,
        }
    }

    /// SQL NOT: Unknown stays Unknown
    pub fn not(self) -> Tri {
        match self {
            Tri::True => Tri::False,
            Tri::False => Tri::True,
            Tri::Unknown => Tri::Unknown,
        }
    }
}

/// A message property or literal
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing or unresolvable; propagates as Unknown
    Null,
    Bool(bool),
    Byte(i8),
    UByte(u8),
    Short(i16),
    UShort(u16),
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Float(f32),
    Double(f64),
    Str(String),
}

impl Value {
    /// Interpret as a logical result: booleans map directly, everything
    /// else (including Null) is Unknown
    pub fn as_tri(&self) -> Tri {
        match self {
            Value::Bool(b) => Tri::from_bool(*b),
            _ => Tri::Unknown,
        }
    }

    /// Materialize a logical result: True/False become booleans, Unknown
    /// becomes Null
    pub fn from_tri(tri: Tri) -> Value {
        match tri {
            Tri::True => Value::Bool(true),
            Tri::False => Value::Bool(false),
            Tri::Unknown => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Comparison operators of the selector language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Gt,
    Ne,
    Le,
    Ge,
}

impl CompareOp {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CompareOp::Eq),
            1 => Some(CompareOp::Lt),
            2 => Some(CompareOp::Gt),
            3 => Some(CompareOp::Ne),
            4 => Some(CompareOp::Le),
            5 => Some(CompareOp::Ge),
            _ => None,
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Numeric classification feeding the promotion ladder
enum NumClass {
    /// byte / short / int
    SmallSigned(i32),
    /// ubyte / ushort / uint, zero-extension pending
    SmallUnsigned(u32),
    Long(i64),
    Float(f32),
    Double(f64),
}

fn classify(value: &Value) -> Option<NumClass> {
    match value {
        Value::Byte(v) => Some(NumClass::SmallSigned(*v as i32)),
        Value::Short(v) => Some(NumClass::SmallSigned(*v as i32)),
        Value::Int(v) => Some(NumClass::SmallSigned(*v)),
        Value::UByte(v) => Some(NumClass::SmallUnsigned(*v as u32)),
        Value::UShort(v) => Some(NumClass::SmallUnsigned(*v as u32)),
        Value::UInt(v) => Some(NumClass::SmallUnsigned(*v)),
        Value::Long(v) => Some(NumClass::Long(*v)),
        // ulong compares through the signed 64-bit lane
        Value::ULong(v) => Some(NumClass::Long(*v as i64)),
        Value::Float(v) => Some(NumClass::Float(*v)),
        Value::Double(v) => Some(NumClass::Double(*v)),
        Value::Null | Value::Bool(_) | Value::Str(_) => None,
    }
}

/// A numerically promoted operand pair
enum Promoted {
    Int(i32, i32),
    Long(i64, i64),
    Float(f32, f32),
    Double(f64, f64),
}

/// Promote two numeric values up the ladder:
/// both small signed -> int; any other int-family mix -> long, with
/// unsigned operands masked to 32 bits before widening; anything with a
/// float -> float; anything with a double -> double.
fn promote_pair(left: &Value, right: &Value) -> Option<Promoted> {
    use NumClass::*;
    let (l, r) = (classify(left)?, classify(right)?);
    Some(match (l, r) {
        (Double(a), b) => Promoted::Double(a, to_f64(b)),
        (a, Double(b)) => Promoted::Double(to_f64(a), b),
        (Float(a), b) => Promoted::Float(a, to_f32(b)),
        (a, Float(b)) => Promoted::Float(to_f32(a), b),
        (SmallSigned(a), SmallSigned(b)) => Promoted::Int(a, b),
        (a, b) => Promoted::Long(to_i64(a), to_i64(b)),
    })
}

fn to_i64(c: NumClass) -> i64 {
    match c {
        NumClass::SmallSigned(v) => v as i64,
        NumClass::SmallUnsigned(v) => v as i64,
        NumClass::Long(v) => v,
        // unreachable for float/double; promote_pair handles those first
        NumClass::Float(v) => v as i64,
        NumClass::Double(v) => v as i64,
    }
}

fn to_f32(c: NumClass) -> f32 {
    match c {
        NumClass::SmallSigned(v) => v as f32,
        NumClass::SmallUnsigned(v) => v as f32,
        NumClass::Long(v) => v as f32,
        NumClass::Float(v) => v,
        NumClass::Double(v) => v as f32,
    }
}

fn to_f64(c: NumClass) -> f64 {
    match c {
        NumClass::SmallSigned(v) => v as f64,
        NumClass::SmallUnsigned(v) => v as f64,
        NumClass::Long(v) => v as f64,
        NumClass::Float(v) => v as f64,
        NumClass::Double(v) => v,
    }
}

/// Compare two values under selector semantics. String comparison is
/// lexicographic over the raw bytes and defined only for string pairs;
/// booleans support equality only; numeric pairs promote. Null operands and
/// unpromotable pairings yield Unknown.
pub fn compare(op: CompareOp, left: &Value, right: &Value) -> Tri {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Tri::Unknown,
        (Value::Str(a), Value::Str(b)) => Tri::from_bool(op.accepts(a.as_bytes().cmp(b.as_bytes()))),
        (Value::Bool(a), Value::Bool(b)) => match op {
            CompareOp::Eq => Tri::from_bool(a == b),
            CompareOp::Ne => Tri::from_bool(a != b),
            _ => Tri::Unknown,
        },
        _ => match promote_pair(left, right) {
            Some(Promoted::Int(a, b)) => Tri::from_bool(op.accepts(a.cmp(&b))),
            Some(Promoted::Long(a, b)) => Tri::from_bool(op.accepts(a.cmp(&b))),
            Some(Promoted::Float(a, b)) => match a.partial_cmp(&b) {
                Some(ordering) => Tri::from_bool(op.accepts(ordering)),
                None => Tri::Unknown,
            },
            Some(Promoted::Double(a, b)) => match a.partial_cmp(&b) {
                Some(ordering) => Tri::from_bool(op.accepts(ordering)),
                None => Tri::Unknown,
            },
            None => Tri::Unknown,
        },
    }
}
