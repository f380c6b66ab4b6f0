use super::diff::{AuditDiff, diff_records};
use super::migrator::ShadowMigrator;
use super::principal::{CurrentUser, OperationScope, PrincipalResolver};
use super::scripts::MigrationScripts;
use crate::config::AuditConfig;
use crate::core::{DbError, Record, Result, RowKey, TableName, Value};
use crate::record::Connections;
use crate::storage::{InsertMode, RelationalStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// One row of a shadow table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub table: String,
    pub primary_id: String,
    pub user_id: i64,
    pub request: String,
    pub before_fields: Map<String, JsonValue>,
    pub after_fields: Map<String, JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    fn to_row(&self) -> Result<Record> {
        let mut row = Record::new();
        row.insert("primary_id".into(), Value::Text(self.primary_id.clone()));
        row.insert("user_id".into(), Value::Integer(self.user_id));
        row.insert("request".into(), Value::Text(self.request.clone()));
        row.insert(
            "before_fields".into(),
            Value::Text(serde_json::to_string(&self.before_fields)?),
        );
        row.insert(
            "after_fields".into(),
            Value::Text(serde_json::to_string(&self.after_fields)?),
        );
        row.insert("created_at".into(), Value::Text(self.created_at.to_rfc3339()));
        Ok(row)
    }

    /// Reads a shadow-table row back.
    pub fn from_row(table: &str, row: &Record) -> Result<Self> {
        let created_at = DateTime::parse_from_rfc3339(text_column(table, row, "created_at")?)
            .map_err(|e| DbError::Serialization(format!("Invalid created_at: {}", e)))?
            .with_timezone(&Utc);

        Ok(Self {
            table: table.to_string(),
            primary_id: text_column(table, row, "primary_id")?.to_string(),
            user_id: row.get("user_id").and_then(Value::as_i64).unwrap_or(0),
            request: row
                .get("request")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            before_fields: json_column(row, "before_fields")?,
            after_fields: json_column(row, "after_fields")?,
            created_at,
        })
    }
}

fn text_column<'a>(table: &str, row: &'a Record, name: &str) -> Result<&'a str> {
    row.get(name).and_then(Value::as_str).ok_or_else(|| {
        DbError::Serialization(format!(
            "Audit row of '{}' has no text column '{}'",
            table, name
        ))
    })
}

fn json_column(row: &Record, name: &str) -> Result<Map<String, JsonValue>> {
    match row.get(name) {
        Some(Value::Text(raw)) => Ok(serde_json::from_str(raw)?),
        _ => Ok(Map::new()),
    }
}

/// Persists field diffs into per-table shadow tables.
///
/// Configuration is captured at construction; build a new writer to pick up
/// changed settings.
pub struct AuditLogWriter {
    config: AuditConfig,
    store: Arc<dyn RelationalStore>,
    migrator: ShadowMigrator,
    resolver: PrincipalResolver,
}

impl AuditLogWriter {
    pub fn new(config: AuditConfig, connections: &Connections) -> Result<Self> {
        config.validate()?;
        let store = connections.get(&config.connection)?;
        let migrator = ShadowMigrator::new(
            store.clone(),
            config.registry(),
            Arc::new(MigrationScripts::embedded()),
        );
        Ok(Self {
            config,
            store,
            migrator,
            resolver: PrincipalResolver::default(),
        })
    }

    pub fn with_scripts(mut self, scripts: MigrationScripts) -> Self {
        self.migrator = ShadowMigrator::new(
            self.store.clone(),
            self.config.registry(),
            Arc::new(scripts),
        );
        self
    }

    pub fn with_current_user(mut self, user: Arc<dyn CurrentUser>) -> Self {
        self.resolver = PrincipalResolver::new(Some(user));
        self
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn migrator(&self) -> &ShadowMigrator {
        &self.migrator
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Logs the diff between `before` and `after` for row `primary_id` of
    /// `table`. Returns the new log row's id, or `None` when nothing
    /// qualified for the trail.
    pub async fn store_log(
        &self,
        table: &str,
        primary_id: &RowKey,
        before: &Record,
        after: &Record,
        principal: Option<i64>,
    ) -> Result<Option<i64>> {
        self.store_log_with(&OperationScope::default(), table, primary_id, before, after, principal)
            .await
    }

    pub async fn store_log_with(
        &self,
        scope: &OperationScope,
        table: &str,
        primary_id: &RowKey,
        before: &Record,
        after: &Record,
        principal: Option<i64>,
    ) -> Result<Option<i64>> {
        if primary_id.is_empty_id() {
            return Err(DbError::InvalidInput(format!(
                "Audit log for '{}' needs a non-empty primary id",
                table
            )));
        }
        if !self.config.enabled {
            return Ok(None);
        }

        let AuditDiff { before: old, after: new } =
            diff_records(table, before, after, &self.config);
        if old.is_empty() && new.is_empty() {
            event!(Level::DEBUG, table, primary_id = %primary_id, "no auditable changes");
            return Ok(None);
        }

        let record = AuditRecord {
            table: table.to_string(),
            primary_id: primary_id.to_string(),
            user_id: self.resolver.resolve(scope, principal),
            request: scope.request_or_default(),
            before_fields: old,
            after_fields: new,
            created_at: Utc::now(),
        };
        let shadow = self.config.shadow_table(table);
        let span = info_span!("audit.store_log", shadow = %shadow, primary_id = %record.primary_id);

        let row = record.to_row()?;
        self.insert_with_retry(&shadow, &row).instrument(span).await
    }

    /// A missing shadow table is recreated once; a second failure propagates.
    async fn insert_with_retry(&self, shadow: &TableName, row: &Record) -> Result<Option<i64>> {
        self.migrator.ensure(shadow).await?;
        match self.store.insert_row(shadow, row, InsertMode::Insert).await {
            Err(err) if err.is_table_not_found() => {
                event!(Level::WARN, error = %err, "shadow table missing at write time, recreating");
                self.migrator.force(shadow).await?;
                self.store.insert_row(shadow, row, InsertMode::Insert).await
            }
            other => other,
        }
    }

    /// Where logs for `table` land.
    pub fn shadow_table(&self, table: &str) -> TableName {
        self.config.shadow_table(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn writer(store: &MemoryStore, config: AuditConfig) -> AuditLogWriter {
        let connections = Connections::new(Arc::new(store.clone()));
        AuditLogWriter::new(config, &connections).unwrap()
    }

    #[tokio::test]
    async fn test_writes_one_row_per_diff() {
        let store = MemoryStore::new();
        let w = writer(&store, AuditConfig::new());
        let before = record(&[("id", 4.into()), ("name", "Ann".into())]);
        let after = record(&[("id", 4.into()), ("name", "Anna".into())]);

        let id = w.store_log("users", &RowKey::from(4), &before, &after, Some(12)).await.unwrap();
        assert_eq!(id, Some(1));

        let table = store.table(&TableName::new("audit_users")).await.unwrap();
        let rows: Vec<&Record> = table.rows().collect();
        assert_eq!(rows.len(), 1);
        let logged = AuditRecord::from_row("users", rows[0]).unwrap();
        assert_eq!(logged.primary_id, "4");
        assert_eq!(logged.user_id, 12);
        assert_eq!(logged.after_fields["name"], JsonValue::from("Anna"));
    }

    #[tokio::test]
    async fn test_empty_primary_id_is_rejected() {
        let store = MemoryStore::new();
        let w = writer(&store, AuditConfig::new().enabled(false));
        let err = w
            .store_log("users", &RowKey::from(0), &Record::new(), &Record::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_empty_diff_touches_nothing() {
        let store = MemoryStore::new();
        let w = writer(&store, AuditConfig::new());
        let same = record(&[("name", "Ann".into())]);

        assert_eq!(w.store_log("users", &RowKey::from(1), &same, &same, None).await.unwrap(), None);
        assert!(store.table_names().await.is_empty());
    }

    #[test]
    fn test_unknown_connection_alias() {
        let connections = Connections::new(Arc::new(MemoryStore::new()));
        let result = AuditLogWriter::new(AuditConfig::new().connection("audit"), &connections);
        assert!(matches!(result, Err(DbError::InvalidInput(_))));
    }
}
