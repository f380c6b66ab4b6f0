use crate::core::{DbError, Result, TableName};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const DEFAULT_CONNECTION: &str = "default";
pub const DEFAULT_SHADOW_PREFIX: &str = "audit_";
pub const DEFAULT_REGISTRY_TABLE: &str = "__audit_shadow_versions";
/// Ten years.
pub const MAX_CACHE_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Audit subsystem configuration
///
/// Read once when an `AuditLogWriter` is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Master switch; a disabled writer accepts and drops every log call
    pub enabled: bool,

    /// Schema holding shadow tables and the version registry
    pub schema: Option<String>,

    /// Connection alias the shadow tables live on
    pub connection: String,

    /// Prefix prepended to the source table name
    pub table_prefix: String,

    /// Global table tracking every shadow table's version
    pub registry_table: String,

    /// Source tables excluded from auditing
    pub ignored_tables: BTreeSet<String>,

    /// Source table -> fields excluded from diffs
    pub ignored_fields: BTreeMap<String, BTreeSet<String>>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schema: None,
            connection: DEFAULT_CONNECTION.to_string(),
            table_prefix: DEFAULT_SHADOW_PREFIX.to_string(),
            registry_table: DEFAULT_REGISTRY_TABLE.to_string(),
            ignored_tables: BTreeSet::new(),
            ignored_fields: BTreeMap::new(),
        }
    }
}

impl AuditConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    pub fn connection(mut self, alias: &str) -> Self {
        self.connection = alias.to_string();
        self
    }

    pub fn table_prefix(mut self, prefix: &str) -> Self {
        self.table_prefix = prefix.to_string();
        self
    }

    pub fn registry_table(mut self, name: &str) -> Self {
        self.registry_table = name.to_string();
        self
    }

    /// Mark a whole source table `audit_ignore`
    pub fn ignore_table(mut self, table: &str) -> Self {
        self.ignored_tables.insert(table.to_string());
        self
    }

    /// Mark a single field of a source table `audit_ignore`
    pub fn ignore_field(mut self, table: &str, field: &str) -> Self {
        self.ignored_fields
            .entry(table.to_string())
            .or_default()
            .insert(field.to_string());
        self
    }

    pub fn is_table_ignored(&self, table: &str) -> bool {
        self.ignored_tables.contains(table)
    }

    pub fn is_field_ignored(&self, table: &str, field: &str) -> bool {
        self.ignored_fields
            .get(table)
            .is_some_and(|fields| fields.contains(field))
    }

    /// `<schema>.<prefix><source table>`
    pub fn shadow_table(&self, source_table: &str) -> TableName {
        self.qualify(format!("{}{}", self.table_prefix, source_table))
    }

    pub fn registry(&self) -> TableName {
        self.qualify(self.registry_table.clone())
    }

    fn qualify(&self, name: String) -> TableName {
        match &self.schema {
            Some(schema) => TableName::qualified(schema.as_str(), name),
            None => TableName::new(name),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.table_prefix.is_empty() {
            return Err(DbError::InvalidInput(
                "Audit table_prefix cannot be empty".to_string(),
            ));
        }
        if self.registry_table.is_empty() {
            return Err(DbError::InvalidInput(
                "Audit registry_table cannot be empty".to_string(),
            ));
        }
        if self.connection.is_empty() {
            return Err(DbError::InvalidInput(
                "Audit connection alias cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Active-record behaviour and the audit settings it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    /// Lifetime of a cache snapshot
    pub cache_ttl_secs: i64,

    /// Repopulate the cache from the after-image on save
    pub recache_on_save: bool,

    /// Write a fresh snapshot right after an explicit purge
    pub recache_after_purge: bool,

    pub audit: AuditConfig,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            recache_on_save: true,
            recache_after_purge: false,
            audit: AuditConfig::default(),
        }
    }
}

impl RecordConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.num_seconds();
        self
    }

    pub fn recache_on_save(mut self, enabled: bool) -> Self {
        self.recache_on_save = enabled;
        self
    }

    pub fn recache_after_purge(mut self, enabled: bool) -> Self {
        self.recache_after_purge = enabled;
        self
    }

    pub fn audit(mut self, audit: AuditConfig) -> Self {
        self.audit = audit;
        self
    }

    /// Snapshot lifetime, clamped to `0..=MAX_CACHE_TTL_SECS`.
    pub fn ttl(&self) -> Duration {
        Duration::try_seconds(self.cache_ttl_secs.clamp(0, MAX_CACHE_TTL_SECS)).unwrap_or_default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_ttl_secs < 0 {
            return Err(DbError::InvalidInput(
                "cache_ttl_secs cannot be negative".to_string(),
            ));
        }
        if self.cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(DbError::InvalidInput(format!(
                "cache_ttl_secs cannot exceed {} ({} given)",
                MAX_CACHE_TTL_SECS, self.cache_ttl_secs
            )));
        }
        self.audit.validate()
    }
}
