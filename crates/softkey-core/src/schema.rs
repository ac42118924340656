//! Column descriptors, raw values and sampled value sets

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A column as reported by the database's own metadata
///
/// `declared_type` is the exact type string the engine reports
/// (e.g. `character varying(255)`, `int(11)`). It is never normalized, so two
/// columns are comparable only when these strings are identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Owning table
    pub table: String,

    /// Column name
    pub name: String,

    /// Engine-reported type string
    pub declared_type: String,
}

impl ColumnDescriptor {
    /// Create a new column descriptor
    pub fn new(
        table: impl Into<String>,
        name: impl Into<String>,
        declared_type: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            declared_type: declared_type.into(),
        }
    }

    /// Whether two columns may be compared at all
    pub fn same_type_as(&self, other: &ColumnDescriptor) -> bool {
        self.declared_type == other.declared_type
    }

    /// `table.column`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table, self.name)
    }
}

impl std::fmt::Display for ColumnDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{} ({})", self.table, self.name, self.declared_type)
    }
}

/// A raw, non-NULL value decoded from the database
///
/// Variants never compare equal to each other: `Int(1)` and `Text("1")` are
/// different values. Floats compare by bit pattern so they can be hashed.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Text(v) => v.hash(state),
            Self::Bytes(v) => v.hash(state),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Distinct values sampled from one column
///
/// Computed on demand and dropped after the comparison that needed it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueSet {
    values: HashSet<Value>,
}

impl ValueSet {
    /// Create an empty value set
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Add a value, returning whether it was new
    pub fn insert(&mut self, value: Value) -> bool {
        self.values.insert(value)
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.values.contains(value)
    }

    /// Size of the intersection with another set
    pub fn intersection_len(&self, other: &ValueSet) -> usize {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.values.iter().filter(|v| large.values.contains(*v)).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }
}

impl FromIterator<Value> for ValueSet {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl From<HashSet<Value>> for ValueSet {
    fn from(values: HashSet<Value>) -> Self {
        Self { values }
    }
}

/// Cap on how many distinct candidate values a stage samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowLimit {
    /// `LIMIT n`
    Limited(u64),

    /// Full distinct scan
    Unbounded,
}

impl RowLimit {
    /// The limit as an optional row count
    pub fn as_option(self) -> Option<u64> {
        match self {
            Self::Limited(n) => Some(n),
            Self::Unbounded => None,
        }
    }

    pub fn is_unbounded(self) -> bool {
        matches!(self, Self::Unbounded)
    }
}

impl From<Option<u64>> for RowLimit {
    fn from(limit: Option<u64>) -> Self {
        limit.map_or(Self::Unbounded, Self::Limited)
    }
}

impl std::fmt::Display for RowLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limited(n) => write!(f, "{}", n),
            Self::Unbounded => write!(f, "unbounded"),
        }
    }
}

impl FromStr for RowLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "none" | "unbounded" | "all" | "full" => Ok(Self::Unbounded),
            _ => match s.parse::<u64>() {
                Ok(0) => Err("row limit must be greater than zero".to_string()),
                Ok(n) => Ok(Self::Limited(n)),
                Err(_) => Err(format!(
                    "invalid row limit '{}': expected a positive integer or 'none'",
                    s
                )),
            },
        }
    }
}

impl Serialize for RowLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Limited(n) => serializer.serialize_u64(*n),
            Self::Unbounded => serializer.serialize_str("unbounded"),
        }
    }
}

impl<'de> Deserialize<'de> for RowLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(u64),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Count(0) => Err(serde::de::Error::custom("row limit must be greater than zero")),
            Raw::Count(n) => Ok(Self::Limited(n)),
            Raw::Name(name) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}
