use crate::record::ValidationErrors;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    // MySQL: "Duplicate column name 'x'" / "Duplicate key name 'idx'",
    // Postgres and SQLite: "column \"x\" ... already exists".
    static ref DUPLICATE_STRUCTURE_SIGNATURE: Regex =
        Regex::new(r"(?i)duplicate (column|key) name|already exists").expect("static regex");
    static ref MISSING_TABLE_SIGNATURE: Regex =
        Regex::new(r"(?i)table .* (doesn't exist|does not exist|not found)|no such table")
            .expect("static regex");
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Construction failed: no '{entity}' row for key {key}")]
    ConstructionFailed { entity: String, key: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown field '{field}' on entity '{entity}'")]
    UnknownField { entity: String, field: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Duplicate {element} in table '{table}'")]
    DuplicateStructure { table: String, element: String },

    #[error("Migration {version} of '{table}' failed: {source} (statement: {statement})")]
    MigrationFailed {
        table: String,
        version: u32,
        statement: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    /// True when the error reports a column, index or table that already
    /// exists. Backends that only surface text are matched by message.
    pub fn is_duplicate_structure(&self) -> bool {
        match self {
            Self::DuplicateStructure { .. } | Self::TableExists(_) => true,
            Self::ExecutionError(msg) | Self::ConstraintViolation(msg) => {
                DUPLICATE_STRUCTURE_SIGNATURE.is_match(msg)
            }
            _ => false,
        }
    }

    pub fn is_table_not_found(&self) -> bool {
        match self {
            Self::TableNotFound(_) => true,
            Self::ExecutionError(msg) => MISSING_TABLE_SIGNATURE.is_match(msg),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::ExecutionError(format!("lock poisoned: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_signature_matches_backend_text() {
        let mysql = DbError::ExecutionError("Duplicate column name 'request'".into());
        let pg = DbError::ExecutionError("column \"request\" of relation \"a\" already exists".into());
        let other = DbError::ExecutionError("syntax error near ADD".into());

        assert!(mysql.is_duplicate_structure());
        assert!(pg.is_duplicate_structure());
        assert!(!other.is_duplicate_structure());
    }

    #[test]
    fn test_missing_table_classification() {
        assert!(DbError::TableNotFound("audit_users".into()).is_table_not_found());
        assert!(
            DbError::ExecutionError("Table 'app.audit_users' doesn't exist".into())
                .is_table_not_found()
        );
        assert!(!DbError::InvalidInput("x".into()).is_table_not_found());
    }
}
