pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, Result};
pub use types::{Record, RowKey, TableName};
pub use value::{DataType, EnumValue, Value};
