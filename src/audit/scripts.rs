use crate::core::{DbError, Result, TableName};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

const EMBEDDED_BASE: &str = include_str!("../../sql/audit/base.sql");
const EMBEDDED_MIGRATIONS: &[(u32, &str)] = &[
    (1, include_str!("../../sql/audit/1.sql")),
    (2, include_str!("../../sql/audit/2.sql")),
    (3, include_str!("../../sql/audit/3.sql")),
];

/// Base schema plus numbered migrations for a shadow table.
///
/// Scripts may reference `{table}` (schema-qualified name) and
/// `{table_name}` (bare name); both are substituted at apply time.
#[derive(Debug, Clone)]
pub struct MigrationScripts {
    base: String,
    migrations: BTreeMap<u32, String>,
}

impl MigrationScripts {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            migrations: BTreeMap::new(),
        }
    }

    /// The scripts shipped with the crate.
    pub fn embedded() -> Self {
        let mut scripts = Self::new(EMBEDDED_BASE);
        for (version, sql) in EMBEDDED_MIGRATIONS {
            scripts.migrations.insert(*version, sql.to_string());
        }
        scripts
    }

    pub fn with_migration(mut self, version: u32, sql: impl Into<String>) -> Result<Self> {
        if version == 0 {
            return Err(DbError::InvalidInput(
                "Migration numbers start at 1; 0 is the base schema".to_string(),
            ));
        }
        if self.migrations.insert(version, sql.into()).is_some() {
            return Err(DbError::InvalidInput(format!(
                "Duplicate migration number {}",
                version
            )));
        }
        Ok(self)
    }

    /// Loads `base.sql` and `<N>.sql` files from a directory.
    pub async fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut base = None;
        let mut migrations = BTreeMap::new();

        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let sql = tokio::fs::read_to_string(&path).await?;

            if stem == "base" {
                base = Some(sql);
                continue;
            }
            let version: u32 = stem.parse().map_err(|_| {
                DbError::InvalidInput(format!(
                    "Migration script '{}' must be named <number>.sql",
                    path.display()
                ))
            })?;
            migrations.insert(version, sql);
        }

        let base = base.ok_or_else(|| {
            DbError::InvalidInput(format!("No base.sql in '{}'", dir.display()))
        })?;
        migrations
            .into_iter()
            .try_fold(Self::new(base), |scripts, (version, sql)| {
                scripts.with_migration(version, sql)
            })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Highest migration number, or 0 when only the base schema exists.
    pub fn target_version(&self) -> u32 {
        self.migrations.keys().next_back().copied().unwrap_or(0)
    }

    /// Migrations with `from < version <= to`, ascending.
    pub fn pending(&self, from: u32, to: u32) -> impl Iterator<Item = (u32, &str)> {
        self.migrations
            .range((Bound::Excluded(from), Bound::Included(to.max(from))))
            .map(|(version, sql)| (*version, sql.as_str()))
    }

    pub fn render(sql: &str, table: &TableName) -> String {
        sql.replace("{table_name}", table.name())
            .replace("{table}", &table.to_string())
    }
}

impl Default for MigrationScripts {
    fn default() -> Self {
        Self::embedded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_set() {
        let scripts = MigrationScripts::embedded();
        assert_eq!(scripts.target_version(), 3);
        assert!(scripts.base().contains("{table}"));

        let pending: Vec<u32> = scripts.pending(1, 3).map(|(v, _)| v).collect();
        assert_eq!(pending, vec![2, 3]);
        assert_eq!(scripts.pending(3, 3).count(), 0);
        assert_eq!(scripts.pending(5, 3).count(), 0);
    }

    #[test]
    fn test_render_placeholders() {
        let table = TableName::qualified("history", "audit_users");
        let sql = "CREATE INDEX idx_{table_name}_x ON {table} (x)";
        assert_eq!(
            MigrationScripts::render(sql, &table),
            "CREATE INDEX idx_audit_users_x ON history.audit_users (x)"
        );
    }

    #[test]
    fn test_migration_numbers_are_validated() {
        assert!(MigrationScripts::new("").with_migration(0, "").is_err());
        let scripts = MigrationScripts::new("").with_migration(2, "a").unwrap();
        assert!(scripts.with_migration(2, "b").is_err());
    }

    #[tokio::test]
    async fn test_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("base.sql"), "CREATE TABLE {table} (id INTEGER PRIMARY KEY)").unwrap();
        std::fs::write(dir.path().join("10.sql"), "ALTER TABLE {table} ADD COLUMN b TEXT").unwrap();
        std::fs::write(dir.path().join("2.sql"), "ALTER TABLE {table} ADD COLUMN a TEXT").unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let scripts = MigrationScripts::from_dir(dir.path()).await.unwrap();
        assert_eq!(scripts.target_version(), 10);
        let order: Vec<u32> = scripts.pending(0, 10).map(|(v, _)| v).collect();
        assert_eq!(order, vec![2, 10]);

        std::fs::write(dir.path().join("latest.sql"), "").unwrap();
        assert!(matches!(
            MigrationScripts::from_dir(dir.path()).await,
            Err(DbError::InvalidInput(_))
        ));
    }
}
