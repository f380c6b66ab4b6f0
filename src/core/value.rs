use serde::{Deserialize, Serialize};
use std::fmt;

/// A single column value.
///
/// Equality is strict: values of different variants never compare equal,
/// so `Integer(1) != Float(1.0)`. Change tracking and audit diffs rely on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Bytes(Vec<u8>),
    Enum(EnumValue),
}

/// A member of a backed enumeration: a label plus the scalar stored in the column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    pub label: String,
    pub scalar: Box<Value>,
}

impl EnumValue {
    pub fn new(label: impl Into<String>, scalar: impl Into<Value>) -> Self {
        Self {
            label: label.into(),
            scalar: Box::new(scalar.into()),
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
            Self::Bytes(_) => "BYTES",
            Self::Enum(_) => "ENUM",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Enum(e) => e.scalar.as_i64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Scalars can be primary-key parts and cache key segments.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Null | Self::Enum(_))
    }

    /// Reduces an enum member to its backing scalar; other values are returned as-is.
    pub fn into_scalar(self) -> Value {
        match self {
            Self::Enum(e) => e.scalar.into_scalar(),
            other => other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Bytes(b) => {
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Self::Enum(e) => write!(f, "{}", e.scalar),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<EnumValue> for Value {
    fn from(e: EnumValue) -> Self {
        Self::Enum(e)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
    Bytes,
}

impl DataType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (_, Value::Enum(e)) => self.is_compatible(&e.scalar),
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Float, Value::Float(_)) => true,
            (Self::Float, Value::Integer(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Boolean, Value::Boolean(_)) => true,
            (Self::Bytes, Value::Bytes(_)) => true,
            _ => false,
        }
    }

    /// Maps a SQL type name (`VARCHAR(64)`, `BIGINT UNSIGNED`, `BLOB`, ...) onto a column type.
    pub fn from_sql_type(sql_type: &str) -> Self {
        let upper = sql_type.trim().to_ascii_uppercase();
        let head = upper
            .split(|c: char| c == '(' || c.is_whitespace())
            .next()
            .unwrap_or_default();
        match head {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" | "SERIAL"
            | "BIGSERIAL" | "INT2" | "INT4" | "INT8" => Self::Integer,
            "FLOAT" | "DOUBLE" | "REAL" | "DECIMAL" | "NUMERIC" | "FLOAT4" | "FLOAT8" => Self::Float,
            "BOOL" | "BOOLEAN" => Self::Boolean,
            "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BYTEA" | "BINARY" | "VARBINARY" => {
                Self::Bytes
            }
            _ => Self::Text,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::Float => write!(f, "FLOAT"),
            Self::Text => write!(f, "TEXT"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Bytes => write!(f, "BYTES"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_equality_is_strict() {
        assert_eq!(Value::Integer(42), Value::Integer(42));
        assert_ne!(Value::Integer(1), Value::Float(1.0));
        assert_ne!(Value::Text("1".into()), Value::Integer(1));
    }

    #[test]
    fn test_enum_reduces_to_scalar() {
        let status = Value::from(EnumValue::new("Active", 2));
        assert_eq!(status.clone().into_scalar(), Value::Integer(2));
        assert_eq!(status.as_i64(), Some(2));
        assert!(DataType::Integer.is_compatible(&status));
    }

    #[test]
    fn test_type_compatibility() {
        let int_type = DataType::Integer;
        assert!(int_type.is_compatible(&Value::Integer(42)));
        assert!(int_type.is_compatible(&Value::Null));
        assert!(!int_type.is_compatible(&Value::Text("hello".into())));
        assert!(DataType::Bytes.is_compatible(&Value::Bytes(vec![1, 2])));
    }

    #[test]
    fn test_sql_type_mapping() {
        assert_eq!(DataType::from_sql_type("BIGINT UNSIGNED"), DataType::Integer);
        assert_eq!(DataType::from_sql_type("varchar(255)"), DataType::Text);
        assert_eq!(DataType::from_sql_type("BINARY(16)"), DataType::Bytes);
        assert_eq!(DataType::from_sql_type("DOUBLE PRECISION"), DataType::Float);
        assert_eq!(DataType::from_sql_type("TIMESTAMP"), DataType::Text);
    }
}
