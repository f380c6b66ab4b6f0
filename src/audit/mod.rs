//! Field-level audit trail kept in per-table shadow tables.

pub mod diff;
pub mod migrator;
pub mod principal;
pub mod scripts;
pub mod writer;

pub use diff::{AuditDiff, diff_records, normalize};
pub use migrator::{ShadowMigrator, VERSION_MARKER_PREFIX};
pub use principal::{CurrentUser, FixedUser, OperationScope, PrincipalResolver};
pub use scripts::MigrationScripts;
pub use writer::{AuditLogWriter, AuditRecord};
