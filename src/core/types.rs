use super::{DbError, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A row as a field → value mapping.
pub type Record = BTreeMap<String, Value>;

/// A table name, optionally qualified by a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        let schema = schema.into();
        Self {
            schema: (!schema.is_empty()).then_some(schema),
            name: name.into(),
        }
    }

    /// Parses `schema.table` or `table`.
    pub fn parse(input: &str) -> Self {
        match input.rsplit_once('.') {
            Some((schema, name)) => Self::qualified(schema, name),
            None => Self::new(input),
        }
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Primary-key value of a row: a scalar for single-key entities, an ordered
/// tuple for composite keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowKey {
    Single(Value),
    Composite(Vec<Value>),
}

impl RowKey {
    pub fn parts(&self) -> &[Value] {
        match self {
            Self::Single(v) => std::slice::from_ref(v),
            Self::Composite(parts) => parts,
        }
    }

    /// Zero, empty text and NULL do not identify a row.
    pub fn is_empty_id(&self) -> bool {
        self.parts().is_empty()
            || self.parts().iter().all(|part| match part {
                Value::Null => true,
                Value::Integer(0) => true,
                Value::Text(s) => s.is_empty() || s == "0",
                Value::Bytes(b) => b.is_empty(),
                _ => false,
            })
    }

    /// Pairs the key parts with the primary-key column names, in order.
    pub fn bind(&self, columns: &[&str]) -> Result<Vec<(String, Value)>> {
        let parts = self.parts();
        if parts.len() != columns.len() {
            return Err(DbError::InvalidInput(format!(
                "Key {} has {} part(s), expected {} ({})",
                self,
                parts.len(),
                columns.len(),
                columns.join(", ")
            )));
        }
        if let Some(bad) = parts.iter().find(|part| !part.is_scalar()) {
            return Err(DbError::InvalidInput(format!(
                "Primary key parts must be scalar, got {}",
                bad.type_name()
            )));
        }
        Ok(columns
            .iter()
            .map(|c| c.to_string())
            .zip(parts.iter().cloned())
            .collect())
    }

    /// Sub-key used inside the entity type's cache hash.
    pub fn cache_field(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.parts().iter().map(|p| p.to_string()).collect();
        write!(f, "{}", rendered.join(":"))
    }
}

impl From<i64> for RowKey {
    fn from(id: i64) -> Self {
        Self::Single(Value::Integer(id))
    }
}

impl From<i32> for RowKey {
    fn from(id: i32) -> Self {
        Self::Single(Value::Integer(id as i64))
    }
}

impl From<&str> for RowKey {
    fn from(id: &str) -> Self {
        Self::Single(Value::from(id))
    }
}

impl From<String> for RowKey {
    fn from(id: String) -> Self {
        Self::Single(Value::Text(id))
    }
}

impl From<Value> for RowKey {
    fn from(id: Value) -> Self {
        Self::Single(id)
    }
}

impl From<Vec<Value>> for RowKey {
    fn from(parts: Vec<Value>) -> Self {
        Self::Composite(parts)
    }
}
