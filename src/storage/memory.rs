use super::ddl::{DdlStatement, parse_ddl};
use super::{InsertMode, RelationalStore, Table, TableSchema};
use crate::core::{DbError, Record, Result, TableName, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Counters of store calls, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: u64,
    pub writes: u64,
    pub ddl: u64,
}

#[derive(Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    ddl: AtomicU64,
}

/// In-process relational store.
///
/// Cloning shares the underlying tables, so clones behave like separate
/// connections to the same database.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<HashMap<TableName, Table>>>,
    counters: Arc<Counters>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            ddl: self.counters.ddl.load(Ordering::Relaxed),
        }
    }

    /// Returns a copy of a table for inspection.
    pub async fn table(&self, table: &TableName) -> Result<Table> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))
    }

    pub async fn table_names(&self) -> Vec<TableName> {
        let tables = self.tables.read().await;
        let mut names: Vec<TableName> = tables.keys().cloned().collect();
        names.sort();
        names
    }

    async fn apply(&self, statement: DdlStatement) -> Result<()> {
        let mut tables = self.tables.write().await;
        match statement {
            DdlStatement::CreateTable {
                table,
                columns,
                primary_key,
                if_not_exists,
            } => {
                if tables.contains_key(&table) {
                    if if_not_exists {
                        return Ok(());
                    }
                    return Err(DbError::TableExists(table.to_string()));
                }
                let schema = TableSchema::new(table.to_string(), columns, primary_key);
                tables.insert(table, Table::new(schema));
            }
            DdlStatement::AddColumn { table, column } => {
                let handle = tables
                    .get_mut(&table)
                    .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
                handle.add_column(column)?;
            }
            DdlStatement::CreateIndex {
                table,
                name,
                column,
                if_not_exists,
            } => {
                let handle = tables
                    .get_mut(&table)
                    .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
                handle.create_index(&name, &column, if_not_exists)?;
            }
            DdlStatement::DropTable { table, if_exists } => {
                if tables.remove(&table).is_none() && !if_exists {
                    return Err(DbError::TableNotFound(table.to_string()));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn fetch_row(&self, table: &TableName, key: &[(String, Value)]) -> Result<Option<Record>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read().await;
        let handle = tables
            .get(table)
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
        handle.get(key)
    }

    async fn update_row(
        &self,
        table: &TableName,
        key: &[(String, Value)],
        changes: &Record,
    ) -> Result<u64> {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        let mut tables = self.tables.write().await;
        let handle = tables
            .get_mut(table)
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
        handle.update(key, changes)
    }

    async fn insert_row(
        &self,
        table: &TableName,
        values: &Record,
        mode: InsertMode,
    ) -> Result<Option<i64>> {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        let mut tables = self.tables.write().await;
        let handle = tables
            .get_mut(table)
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
        handle.insert(values, mode)
    }

    async fn table_exists(&self, table: &TableName) -> Result<bool> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.tables.read().await.contains_key(table))
    }

    async fn table_comment(&self, table: &TableName) -> Result<Option<String>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read().await;
        let handle = tables
            .get(table)
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
        Ok(handle.comment().map(str::to_string))
    }

    async fn set_table_comment(&self, table: &TableName, comment: &str) -> Result<()> {
        self.counters.ddl.fetch_add(1, Ordering::Relaxed);
        let mut tables = self.tables.write().await;
        let handle = tables
            .get_mut(table)
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
        handle.set_comment(comment);
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.counters.ddl.fetch_add(1, Ordering::Relaxed);
        for statement in parse_ddl(sql)? {
            self.apply(statement).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ddl_then_rows_roundtrip() {
        let store = MemoryStore::new();
        store
            .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        let users = TableName::new("users");
        assert!(store.table_exists(&users).await.unwrap());

        let mut row = Record::new();
        row.insert("name".into(), Value::from("Ann"));
        let id = store.insert_row(&users, &row, InsertMode::Insert).await.unwrap();
        assert_eq!(id, Some(1));

        let key = vec![("id".to_string(), Value::Integer(1))];
        let mut changes = Record::new();
        changes.insert("name".into(), Value::from("Anna"));
        assert_eq!(store.update_row(&users, &key, &changes).await.unwrap(), 1);

        let fetched = store.fetch_row(&users, &key).await.unwrap().unwrap();
        assert_eq!(fetched["name"], Value::from("Anna"));
        assert_eq!(store.stats(), StoreStats { reads: 2, writes: 2, ddl: 1 });
    }

    #[tokio::test]
    async fn test_comment_and_missing_table() {
        let store = MemoryStore::new();
        let missing = TableName::new("nope");
        assert!(store.table_comment(&missing).await.unwrap_err().is_table_not_found());

        store.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)").await.unwrap();
        let t = TableName::new("t");
        assert_eq!(store.table_comment(&t).await.unwrap(), None);
        store.set_table_comment(&t, "version=2").await.unwrap();
        assert_eq!(store.table_comment(&t).await.unwrap().as_deref(), Some("version=2"));
    }

    #[tokio::test]
    async fn test_recreating_table_is_structural_conflict() {
        let store = MemoryStore::new();
        store.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)").await.unwrap();
        let err = store.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)").await.unwrap_err();
        assert!(err.is_duplicate_structure());
        store.execute("CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY)").await.unwrap();

        store.execute("DROP TABLE t").await.unwrap();
        assert!(!store.table_exists(&TableName::new("t")).await.unwrap());
    }
}
