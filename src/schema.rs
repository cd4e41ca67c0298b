//! Table and column schema discovery.
//!
//! `TableSchema` is the `{column_name: (declared_type, precision, scale)}`
//! map a [`crate::dialect::Dialect::select_schema`] returns for one table.
//! `ColumnType` classifies a declared SQL type into the handful of
//! categories the checksum canonicalisation rules (spec §4.1) distinguish;
//! anything outside that set is `Other` and causes schema validation to
//! reject the pair with [`crate::error::DiffError::SchemaIncompatibility`]
//! rather than guess at a coercion.

use std::collections::BTreeMap;
use std::fmt;

/// A database-qualified table reference: `schema.table` or bare `table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TablePath {
    pub schema: Option<String>,
    pub table: String,
}

impl TablePath {
    pub fn new(table: impl Into<String>) -> Self {
        TablePath {
            schema: None,
            table: table.into(),
        }
    }

    pub fn qualified(schema: impl Into<String>, table: impl Into<String>) -> Self {
        TablePath {
            schema: Some(schema.into()),
            table: table.into(),
        }
    }
}

impl fmt::Display for TablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(s) => write!(f, "{s}.{}", self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

impl From<&str> for TablePath {
    fn from(s: &str) -> Self {
        match s.split_once('.') {
            Some((schema, table)) => TablePath::qualified(schema, table),
            None => TablePath::new(s),
        }
    }
}

/// Classification of a column's declared SQL type. Only these categories
/// have a canonicalisation rule; a type string that maps to `Other` is a
/// schema-incompatibility error the moment two sides need to agree on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    BigInt,
    Float,
    Numeric,
    Text,
    Uuid,
    Timestamp,
    Bool,
    Other,
}

impl ColumnType {
    /// Classify a declared type name the way every dialect's information
    /// schema reports it (`information_schema.columns.data_type`, or
    /// DuckDB's `PRAGMA table_info` type string). Matching is case
    /// insensitive and ignores a trailing `(precision[,scale])`.
    pub fn from_declared(type_str: &str) -> Self {
        let lower = type_str.to_ascii_lowercase();
        let base = lower.split('(').next().unwrap_or(&lower).trim();

        match base {
            "int" | "integer" | "int4" | "smallint" | "int2" | "tinyint" | "mediumint"
            | "serial" | "smallserial" => ColumnType::Int,
            "bigint" | "int8" | "bigserial" | "hugeint" => ColumnType::BigInt,
            "float" | "float4" | "real" | "double" | "double precision" | "float8" => {
                ColumnType::Float
            }
            "decimal" | "numeric" | "dec" | "money" => ColumnType::Numeric,
            "char" | "character" | "varchar" | "character varying" | "text" | "tinytext"
            | "mediumtext" | "longtext" | "bpchar" => ColumnType::Text,
            "uuid" => ColumnType::Uuid,
            "date" | "datetime" | "timestamp" | "timestamptz" | "timestamp without time zone"
            | "timestamp with time zone" => ColumnType::Timestamp,
            "bool" | "boolean" => ColumnType::Bool,
            _ => ColumnType::Other,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::Int | ColumnType::BigInt | ColumnType::Float | ColumnType::Numeric
        )
    }
}

/// Declared shape of one column, as reported by `select_schema`.
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub name: String,
    pub declared_type: String,
    pub column_type: ColumnType,
    /// Decimal precision (total significant digits), when declared.
    pub precision: Option<u32>,
    /// Decimal scale / fractional-second precision, when declared.
    pub scale: Option<u32>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        let declared_type = declared_type.into();
        let column_type = ColumnType::from_declared(&declared_type);
        ColumnSchema {
            name: name.into(),
            declared_type,
            column_type,
            precision: None,
            scale: None,
        }
    }

    pub fn with_precision_scale(mut self, precision: Option<u32>, scale: Option<u32>) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }
}

/// `{column_name: ColumnSchema}`, ordered by name so iteration is
/// deterministic for error messages and generated SQL column lists.
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    columns: BTreeMap<String, ColumnSchema>,
}

impl TableSchema {
    pub fn new(columns: impl IntoIterator<Item = ColumnSchema>) -> Self {
        TableSchema {
            columns: columns.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.values()
    }

    /// The narrower of two declared (precision, scale) pairs, per the
    /// "lossy agreement on the coarser side" canonicalisation rule: both
    /// sides round to the minimum scale/precision observed in the pair.
    pub fn min_precision_scale(
        left: &ColumnSchema,
        right: &ColumnSchema,
    ) -> (Option<u32>, Option<u32>) {
        let precision = match (left.precision, right.precision) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        let scale = match (left.scale, right.scale) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        (precision, scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_type_spellings() {
        assert_eq!(ColumnType::from_declared("VARCHAR(255)"), ColumnType::Text);
        assert_eq!(ColumnType::from_declared("numeric(10,2)"), ColumnType::Numeric);
        assert_eq!(ColumnType::from_declared("BIGINT"), ColumnType::BigInt);
        assert_eq!(ColumnType::from_declared("uuid"), ColumnType::Uuid);
        assert_eq!(ColumnType::from_declared("money_blob"), ColumnType::Other);
    }

    #[test]
    fn min_precision_scale_takes_the_narrower_side() {
        let a = ColumnSchema::new("amount", "numeric").with_precision_scale(Some(10), Some(4));
        let b = ColumnSchema::new("amount", "numeric").with_precision_scale(Some(12), Some(2));
        assert_eq!(TableSchema::min_precision_scale(&a, &b), (Some(10), Some(2)));
    }
}
