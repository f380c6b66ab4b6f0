// ============================================================================
// rustmemodb-record: active records with a field-level audit trail
// ============================================================================

pub mod audit;
pub mod cache;
pub mod config;
pub mod core;
pub mod record;
pub mod storage;

pub use audit::{
    AuditDiff, AuditLogWriter, AuditRecord, CurrentUser, FixedUser, MigrationScripts,
    OperationScope, ShadowMigrator, diff_records,
};
pub use cache::{CacheAdapter, CacheBackend, CacheSnapshot, MemoryCache};
pub use config::{AuditConfig, RecordConfig};
pub use core::{DataType, DbError, EnumValue, Record, Result, RowKey, TableName, Value};
pub use record::{
    ActiveRecord, Connections, EntityDescriptor, EntityModel, FieldDescriptor, FieldRegistry,
    RecordContext, ValidationErrors, load_model, new_model, save_model,
};
pub use storage::{InsertMode, MemoryStore, RelationalStore};
