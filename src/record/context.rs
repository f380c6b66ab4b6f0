use crate::audit::{AuditLogWriter, CurrentUser, OperationScope};
use crate::cache::{CacheAdapter, CacheBackend};
use crate::config::{DEFAULT_CONNECTION, RecordConfig};
use crate::core::{DbError, Result};
use crate::storage::RelationalStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Relational stores by connection alias. The default store answers to
/// `"default"`.
#[derive(Clone)]
pub struct Connections {
    default: Arc<dyn RelationalStore>,
    named: HashMap<String, Arc<dyn RelationalStore>>,
}

impl Connections {
    pub fn new(default: Arc<dyn RelationalStore>) -> Self {
        Self {
            default,
            named: HashMap::new(),
        }
    }

    pub fn with(mut self, alias: &str, store: Arc<dyn RelationalStore>) -> Self {
        self.named.insert(alias.to_string(), store);
        self
    }

    pub fn default_store(&self) -> &Arc<dyn RelationalStore> {
        &self.default
    }

    pub fn get(&self, alias: &str) -> Result<Arc<dyn RelationalStore>> {
        if alias == DEFAULT_CONNECTION {
            return Ok(self.default.clone());
        }
        self.named.get(alias).cloned().ok_or_else(|| {
            DbError::InvalidInput(format!("Unknown connection alias '{}'", alias))
        })
    }
}

/// Everything an active record needs from its surroundings.
///
/// Cheap to clone; clones share the stores, the cache and the audit writer.
/// Per-operation attribution (`with_principal`, `with_request`) lives on the
/// clone it was set on.
#[derive(Clone)]
pub struct RecordContext {
    connections: Connections,
    cache: Option<Arc<dyn CacheBackend>>,
    audit: Option<Arc<AuditLogWriter>>,
    config: RecordConfig,
    scope: OperationScope,
}

impl RecordContext {
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self {
            connections: Connections::new(store),
            cache: None,
            audit: None,
            config: RecordConfig::default(),
            scope: OperationScope::default(),
        }
    }

    pub fn with_config(mut self, config: RecordConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_connection(mut self, alias: &str, store: Arc<dyn RelationalStore>) -> Self {
        self.connections = self.connections.with(alias, store);
        self
    }

    pub fn with_cache(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(backend);
        self
    }

    pub fn with_audit(mut self, writer: Arc<AuditLogWriter>) -> Self {
        self.audit = Some(writer);
        self
    }

    /// Builds an audit writer from the current config and connections.
    pub fn enable_audit(mut self, current_user: Option<Arc<dyn CurrentUser>>) -> Result<Self> {
        let mut writer = AuditLogWriter::new(self.config.audit.clone(), &self.connections)?;
        if let Some(user) = current_user {
            writer = writer.with_current_user(user);
        }
        self.audit = Some(Arc::new(writer));
        Ok(self)
    }

    /// Attributes every save made through this context to `principal`,
    /// e.g. a system account in a background job.
    pub fn with_principal(mut self, principal: i64) -> Self {
        self.scope.principal = Some(principal);
        self
    }

    pub fn without_principal(mut self) -> Self {
        self.scope.principal = None;
        self
    }

    pub fn with_request(mut self, request: impl Into<String>) -> Self {
        self.scope.request = Some(request.into());
        self
    }

    pub fn store(&self) -> &Arc<dyn RelationalStore> {
        self.connections.default_store()
    }

    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    pub fn cache(&self) -> Option<CacheAdapter> {
        self.cache
            .as_ref()
            .map(|backend| CacheAdapter::new(backend.clone(), self.config.ttl()))
    }

    pub fn audit(&self) -> Option<&AuditLogWriter> {
        self.audit.as_deref()
    }

    pub fn config(&self) -> &RecordConfig {
        &self.config
    }

    pub fn scope(&self) -> &OperationScope {
        &self.scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::AuditConfig;
    use crate::storage::MemoryStore;

    #[test]
    fn test_connection_aliases() {
        let connections = Connections::new(Arc::new(MemoryStore::new()))
            .with("audit", Arc::new(MemoryStore::new()));
        assert!(connections.get("default").is_ok());
        assert!(connections.get("audit").is_ok());
        assert!(matches!(connections.get("reports"), Err(DbError::InvalidInput(_))));
    }

    #[test]
    fn test_audit_routed_to_configured_connection() {
        let audit_store = MemoryStore::new();
        let ctx = RecordContext::new(Arc::new(MemoryStore::new()))
            .with_connection("audit", Arc::new(audit_store))
            .with_config(RecordConfig::new().audit(AuditConfig::new().connection("audit")))
            .enable_audit(None)
            .unwrap();
        assert_eq!(ctx.audit().unwrap().config().connection, "audit");

        let missing = RecordContext::new(Arc::new(MemoryStore::new()))
            .with_config(RecordConfig::new().audit(AuditConfig::new().connection("audit")))
            .enable_audit(None);
        assert!(missing.is_err());
    }

    #[test]
    fn test_scope_and_cache() {
        let ctx = RecordContext::new(Arc::new(MemoryStore::new()))
            .with_cache(Arc::new(MemoryCache::default()))
            .with_principal(7)
            .with_request("job:nightly");
        assert_eq!(ctx.scope().principal, Some(7));
        assert_eq!(ctx.scope().request.as_deref(), Some("job:nightly"));
        assert_eq!(ctx.cache().unwrap().ttl(), chrono::Duration::seconds(3600));
        assert_eq!(ctx.without_principal().scope().principal, None);
    }
}
