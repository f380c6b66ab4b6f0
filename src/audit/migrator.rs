//! Creates shadow tables and walks them forward through the numbered
//! migration scripts.
//!
//! Versions are kept in two places: a global registry table with one row per
//! shadow table, and a marker comment on the shadow table itself. Processes
//! may migrate the same table at the same time without coordinating; a script
//! that fails because its column or index already exists is taken as already
//! applied.

use super::scripts::MigrationScripts;
use crate::core::{DbError, Record, Result, TableName, Value};
use crate::storage::{InsertMode, RelationalStore};
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{Instrument, Level, event, info_span};

pub const VERSION_MARKER_PREFIX: &str = "audit-shadow version=";

lazy_static! {
    static ref VERSION_MARKER: Regex = Regex::new(r"version=(\d+)").expect("static regex");
}

pub struct ShadowMigrator {
    store: Arc<dyn RelationalStore>,
    registry: TableName,
    scripts: Arc<MigrationScripts>,
    registry_ready: OnceCell<()>,
    /// Shadow tables this process already brought to the target version.
    known: Mutex<HashMap<TableName, u32>>,
}

impl ShadowMigrator {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        registry: TableName,
        scripts: Arc<MigrationScripts>,
    ) -> Self {
        Self {
            store,
            registry,
            scripts,
            registry_ready: OnceCell::new(),
            known: Mutex::new(HashMap::new()),
        }
    }

    pub fn target_version(&self) -> u32 {
        self.scripts.target_version()
    }

    pub fn registry(&self) -> &TableName {
        &self.registry
    }

    /// Makes sure `shadow` exists and is at the target version; returns the
    /// version it ends at. Cheap once this process has seen the table current.
    pub async fn ensure(&self, shadow: &TableName) -> Result<u32> {
        if let Some(version) = self.known_version(shadow)?
            && version >= self.target_version()
        {
            return Ok(version);
        }
        self.run(shadow, false).await
    }

    /// Like `ensure`, but ignores the registry and the in-process memo and
    /// inspects the physical table. Used when a write found the table missing.
    pub async fn force(&self, shadow: &TableName) -> Result<u32> {
        self.run(shadow, true).await
    }

    async fn run(&self, shadow: &TableName, force: bool) -> Result<u32> {
        let target = self.target_version();
        let span = info_span!("audit.shadow.migrate", table = %shadow, target, force);
        self.migrate(shadow, target, force).instrument(span).await
    }

    async fn migrate(&self, shadow: &TableName, target: u32, force: bool) -> Result<u32> {
        self.ensure_registry().await?;

        let registered = if force {
            None
        } else {
            self.registered_version(shadow).await?
        };
        let mut current = match registered {
            Some(version) => version,
            None => self.bootstrap(shadow).await?,
        };

        if current > target {
            // Migrated by a newer build; leave it alone.
            event!(Level::DEBUG, current, "shadow table ahead of known scripts");
            self.remember(shadow, current)?;
            return Ok(current);
        }

        for (version, sql) in self.scripts.pending(current, target) {
            self.apply_script(shadow, version, sql).await?;
            self.write_marker(shadow, version).await?;
            current = version;
        }

        if registered != Some(current) {
            self.record_version(shadow, current).await?;
            event!(Level::INFO, version = current, "shadow table registered");
        }
        self.remember(shadow, current)?;
        Ok(current)
    }

    /// First touch of a table the registry does not know: create it from the
    /// base script, or adopt the version its marker carries.
    async fn bootstrap(&self, shadow: &TableName) -> Result<u32> {
        if self.store.table_exists(shadow).await? {
            let version = self.read_marker(shadow).await?;
            event!(Level::DEBUG, version, "adopting unregistered shadow table");
            return Ok(version);
        }

        let sql = MigrationScripts::render(self.scripts.base(), shadow);
        match self.store.execute(&sql).await {
            Ok(()) => event!(Level::INFO, "shadow table created"),
            Err(err) if err.is_duplicate_structure() => {
                event!(Level::WARN, error = %err, "shadow table created concurrently");
                return self.read_marker(shadow).await;
            }
            Err(err) => {
                event!(Level::ERROR, error = %err, "shadow base schema failed");
                return Err(DbError::MigrationFailed {
                    table: shadow.to_string(),
                    version: 0,
                    statement: sql,
                    source: Box::new(err),
                });
            }
        }
        self.write_marker(shadow, 0).await?;
        Ok(0)
    }

    async fn apply_script(&self, shadow: &TableName, version: u32, sql: &str) -> Result<()> {
        let rendered = MigrationScripts::render(sql, shadow);
        match self.store.execute(&rendered).await {
            Ok(()) => {
                event!(Level::INFO, version, "shadow migration applied");
                Ok(())
            }
            Err(err) if err.is_duplicate_structure() => {
                event!(Level::WARN, version, error = %err, "shadow migration already applied, skipping");
                Ok(())
            }
            Err(err) => {
                event!(Level::ERROR, version, error = %err, "shadow migration failed");
                Err(DbError::MigrationFailed {
                    table: shadow.to_string(),
                    version,
                    statement: rendered,
                    source: Box::new(err),
                })
            }
        }
    }

    async fn ensure_registry(&self) -> Result<()> {
        self.registry_ready
            .get_or_try_init(|| async {
                let sql = format!(
                    "CREATE TABLE IF NOT EXISTS {} (schema_name VARCHAR(64) NOT NULL, table_name VARCHAR(128) NOT NULL, version INTEGER NOT NULL, updated_at VARCHAR(40) NOT NULL, PRIMARY KEY (schema_name, table_name))",
                    self.registry
                );
                match self.store.execute(&sql).await {
                    Err(err) if !err.is_duplicate_structure() => Err(err),
                    _ => Ok(()),
                }
            })
            .await?;
        Ok(())
    }

    fn registry_key(shadow: &TableName) -> Vec<(String, Value)> {
        vec![
            ("schema_name".to_string(), Value::from(shadow.schema().unwrap_or_default())),
            ("table_name".to_string(), Value::from(shadow.name())),
        ]
    }

    pub async fn registered_version(&self, shadow: &TableName) -> Result<Option<u32>> {
        self.ensure_registry().await?;
        let row = self
            .store
            .fetch_row(&self.registry, &Self::registry_key(shadow))
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        match row
            .get("version")
            .and_then(Value::as_i64)
            .and_then(|v| u32::try_from(v).ok())
        {
            Some(v) => Ok(Some(v)),
            _ => Err(DbError::ExecutionError(format!(
                "Invalid version value for shadow table '{}' in '{}'",
                shadow, self.registry
            ))),
        }
    }

    async fn record_version(&self, shadow: &TableName, version: u32) -> Result<()> {
        let mut row: Record = Self::registry_key(shadow).into_iter().collect();
        row.insert("version".to_string(), Value::Integer(version as i64));
        row.insert("updated_at".to_string(), Value::Text(Utc::now().to_rfc3339()));
        self.store
            .insert_row(&self.registry, &row, InsertMode::Upsert)
            .await?;
        Ok(())
    }

    /// Version carried by the table's marker comment; 0 when absent or unreadable.
    pub async fn read_marker(&self, shadow: &TableName) -> Result<u32> {
        let comment = self.store.table_comment(shadow).await?;
        Ok(comment
            .as_deref()
            .and_then(|c| VERSION_MARKER.captures(c))
            .and_then(|caps| caps[1].parse().ok())
            .unwrap_or(0))
    }

    async fn write_marker(&self, shadow: &TableName, version: u32) -> Result<()> {
        self.store
            .set_table_comment(shadow, &format!("{}{}", VERSION_MARKER_PREFIX, version))
            .await
    }

    fn known_version(&self, shadow: &TableName) -> Result<Option<u32>> {
        Ok(self.known.lock()?.get(shadow).copied())
    }

    fn remember(&self, shadow: &TableName, version: u32) -> Result<()> {
        self.known.lock()?.insert(shadow.clone(), version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn migrator(store: &MemoryStore) -> ShadowMigrator {
        ShadowMigrator::new(
            Arc::new(store.clone()),
            TableName::new("__audit_shadow_versions"),
            Arc::new(MigrationScripts::embedded()),
        )
    }

    #[tokio::test]
    async fn test_creates_and_migrates_new_table() {
        let store = MemoryStore::new();
        let shadow = TableName::new("audit_users");

        let version = migrator(&store).ensure(&shadow).await.unwrap();
        assert_eq!(version, 3);

        let table = store.table(&shadow).await.unwrap();
        assert!(table.schema().get_column("request").is_some());
        assert!(table.has_index("idx_audit_users_primary_id"));
        assert_eq!(table.comment(), Some("audit-shadow version=3"));
    }

    #[tokio::test]
    async fn test_memo_skips_registry_on_second_call() {
        let store = MemoryStore::new();
        let shadow = TableName::new("audit_users");
        let m = migrator(&store);
        m.ensure(&shadow).await.unwrap();

        let before = store.stats();
        m.ensure(&shadow).await.unwrap();
        assert_eq!(store.stats(), before);
    }

    #[tokio::test]
    async fn test_adopts_marker_of_unregistered_table() {
        let store = MemoryStore::new();
        let shadow = TableName::new("audit_posts");
        store
            .execute("CREATE TABLE audit_posts (id INTEGER PRIMARY KEY, primary_id TEXT NOT NULL, user_id INTEGER NOT NULL, before_fields TEXT, after_fields TEXT, created_at TEXT NOT NULL, request TEXT)")
            .await
            .unwrap();
        store.set_table_comment(&shadow, "audit-shadow version=1").await.unwrap();

        let m = migrator(&store);
        assert_eq!(m.ensure(&shadow).await.unwrap(), 3);
        assert_eq!(m.registered_version(&shadow).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_out_of_range_registry_version_is_invalid() {
        let store = MemoryStore::new();
        let shadow = TableName::new("audit_users");
        let m = migrator(&store);
        m.ensure(&shadow).await.unwrap();

        let mut row: Record = ShadowMigrator::registry_key(&shadow).into_iter().collect();
        row.insert("version".to_string(), Value::Integer(u32::MAX as i64 + 2));
        row.insert("updated_at".to_string(), Value::from("2026-01-01T00:00:00Z"));
        store
            .insert_row(m.registry(), &row, InsertMode::Upsert)
            .await
            .unwrap();

        let err = m.registered_version(&shadow).await.unwrap_err();
        assert!(matches!(err, DbError::ExecutionError(msg) if msg.contains("Invalid version value")));
    }

    #[tokio::test]
    async fn test_hard_failure_carries_statement() {
        let store = MemoryStore::new();
        let scripts = MigrationScripts::embedded()
            .with_migration(4, "ALTER TABLE {table} ADD COLUMN broken NOSUCHTYPE(")
            .unwrap();
        let m = ShadowMigrator::new(
            Arc::new(store.clone()),
            TableName::new("__audit_shadow_versions"),
            Arc::new(scripts),
        );

        let err = m.ensure(&TableName::new("audit_users")).await.unwrap_err();
        let DbError::MigrationFailed { version, statement, .. } = err else {
            panic!("expected MigrationFailed, got {err:?}");
        };
        assert_eq!(version, 4);
        assert!(statement.contains("audit_users"));

        // scripts before the failure stay applied
        let marker = m.read_marker(&TableName::new("audit_users")).await.unwrap();
        assert_eq!(marker, 3);
    }
}
