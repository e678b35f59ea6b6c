//! Target table descriptors and parameterised queries.
//!
//! Identifiers (table and column names) are validated up front and always
//! quoted when rendered; row keys and other values only ever travel as bound
//! parameters.

use serde::{Deserialize, Serialize};

use crate::error::GarboError;

/// A single bound SQL value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

/// SQL type of a key column. Used to declare the columns of a cursor so that
/// comparisons against the target table use the same affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Integer,
    Text,
    Real,
    Blob,
}

impl KeyType {
    pub fn as_sql(self) -> &'static str {
        match self {
            KeyType::Integer => "INTEGER",
            KeyType::Text => "TEXT",
            KeyType::Real => "REAL",
            KeyType::Blob => "BLOB",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyColumn {
    pub name: String,
    #[serde(rename = "type", default = "default_key_type")]
    pub key_type: KeyType,
}

fn default_key_type() -> KeyType {
    KeyType::Integer
}

impl KeyColumn {
    pub fn new(name: impl Into<String>, key_type: KeyType) -> Result<Self, GarboError> {
        let name = name.into();
        validate_identifier("column", &name)?;
        Ok(Self { name, key_type })
    }

    pub fn integer(name: impl Into<String>) -> Result<Self, GarboError> {
        Self::new(name, KeyType::Integer)
    }

    pub fn text(name: impl Into<String>) -> Result<Self, GarboError> {
        Self::new(name, KeyType::Text)
    }
}

/// The table a pruner deletes from, and the (possibly composite) key that
/// identifies its rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTable {
    name: String,
    key: Vec<KeyColumn>,
}

impl TargetTable {
    pub fn new(name: impl Into<String>, key: Vec<KeyColumn>) -> Result<Self, GarboError> {
        let name = name.into();
        validate_identifier("table", &name)?;
        if key.is_empty() {
            return Err(GarboError::Config(format!("table {name} has no key columns")));
        }
        for column in &key {
            validate_identifier("column", &column.name)?;
        }
        Ok(Self { name, key })
    }

    /// Shorthand for the common `id INTEGER` key.
    pub fn with_id(name: impl Into<String>) -> Result<Self, GarboError> {
        Self::new(name, vec![KeyColumn::integer("id")?])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &[KeyColumn] {
        &self.key
    }

    pub fn key_arity(&self) -> usize {
        self.key.len()
    }
}

/// A SQL statement plus the values bound to its `?` placeholders.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SqlQuery {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<SqlValue>,
}

impl SqlQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: SqlValue) -> Self {
        self.params.push(value);
        self
    }
}

pub(crate) fn validate_identifier(kind: &'static str, value: &str) -> Result<(), GarboError> {
    let mut chars = value.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(GarboError::InvalidName {
            kind,
            value: value.to_string(),
        })
    }
}

/// Quote an already validated identifier.
pub(crate) fn quote_ident(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}
