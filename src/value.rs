//! Scalar value types shared by every dialect and the diff algorithms.
//!
//! `KeyValue` is the totally-ordered domain primary keys are drawn from;
//! `Value` is the wider scalar domain a row cell may hold. Both are plain
//! data — canonicalisation into the form used for checksumming happens in
//! SQL, rendered by a [`crate::dialect::Dialect`], not here.

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDateTime;

/// A single component of a (possibly composite) primary key.
///
/// Ordered the way the source domain is ordered: integers numerically,
/// text and UUIDs lexicographically. `Numeric` stores the original decimal
/// text and compares by parsed value so `"10"` sorts after `"9"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValue {
    Int(i64),
    Numeric(String),
    Uuid(String),
    Text(String),
}

impl KeyValue {
    /// Render as the literal text used to splice this value into generated
    /// SQL (`WHERE key >= <lit>`-style checkpoint predicates). Callers are
    /// responsible for quoting through the active dialect, not this method.
    pub fn to_sql_literal(&self) -> String {
        match self {
            KeyValue::Int(i) => i.to_string(),
            KeyValue::Numeric(s) => s.clone(),
            KeyValue::Uuid(s) | KeyValue::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sql_literal())
    }
}

fn numeric_cmp(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyValue::Int(a), KeyValue::Int(b)) => a.cmp(b),
            (KeyValue::Numeric(a), KeyValue::Numeric(b)) => numeric_cmp(a, b),
            (KeyValue::Uuid(a), KeyValue::Uuid(b)) => a.cmp(b),
            (KeyValue::Text(a), KeyValue::Text(b)) => a.cmp(b),
            // Mixed-variant comparisons only arise from malformed schemas;
            // fall back to textual order rather than panic.
            _ => self.to_sql_literal().cmp(&other.to_sql_literal()),
        }
    }
}

/// A composite key is a short tuple of `KeyValue`s in declared column order.
pub type CompositeKey = smallvec::SmallVec<[KeyValue; 4]>;

/// A scalar cell in a materialised row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    BigInt(i64),
    Float(f64),
    Numeric(String),
    Text(String),
    Bool(bool),
    Timestamp(NaiveDateTime),
    Null,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) | Value::BigInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Numeric(v) | Value::Text(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{}", if *v { 1 } else { 0 }),
            Value::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::Null => write!(f, ""),
        }
    }
}

/// A materialised row: key columns, then optional update column, then
/// extra columns, in the order the originating [`crate::segment::TableSegment`]
/// projected them.
pub type Row = Vec<Value>;

/// One element of a diff stream: a signed row. `'-'` marks a row present
/// on (or differing from) the left side, `'+'` the right side. A changed
/// row surfaces as a `-`/`+` pair sharing the same key columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Minus,
    Plus,
}

impl Sign {
    pub fn as_char(self) -> char {
        match self {
            Sign::Minus => '-',
            Sign::Plus => '+',
        }
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

#[derive(Debug, Clone)]
pub struct DiffRecord {
    pub sign: Sign,
    pub row: Row,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_keys_order_by_value_not_text() {
        let mut keys = vec![
            KeyValue::Numeric("10".into()),
            KeyValue::Numeric("9".into()),
            KeyValue::Numeric("2".into()),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                KeyValue::Numeric("2".into()),
                KeyValue::Numeric("9".into()),
                KeyValue::Numeric("10".into()),
            ]
        );
    }

    #[test]
    fn int_keys_order_numerically() {
        assert!(KeyValue::Int(5) < KeyValue::Int(10));
    }
}
