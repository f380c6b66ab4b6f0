pub mod ddl;
pub mod memory;
pub mod table;

pub use memory::{MemoryStore, StoreStats};
pub use table::{Column, InsertMode, Table, TableSchema};

use crate::core::{Record, Result, TableName, Value};
use async_trait::async_trait;

/// Relational store seam consumed by active records and the audit subsystem.
///
/// Row keys are passed as ordered `(column, value)` pairs so composite keys
/// need no special casing.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Fetches one row by primary key. `Ok(None)` when no row matches.
    async fn fetch_row(&self, table: &TableName, key: &[(String, Value)]) -> Result<Option<Record>>;

    /// Applies `changes` to the row addressed by `key`, returning the number of rows touched.
    async fn update_row(&self, table: &TableName, key: &[(String, Value)], changes: &Record)
    -> Result<u64>;

    /// Inserts a row and returns the last inserted id, if the table assigns one.
    async fn insert_row(&self, table: &TableName, values: &Record, mode: InsertMode)
    -> Result<Option<i64>>;

    async fn table_exists(&self, table: &TableName) -> Result<bool>;

    async fn table_comment(&self, table: &TableName) -> Result<Option<String>>;

    async fn set_table_comment(&self, table: &TableName, comment: &str) -> Result<()>;

    /// Executes a DDL script (one or more statements).
    async fn execute(&self, sql: &str) -> Result<()>;
}
