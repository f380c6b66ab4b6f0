//! DDL accepted by the in-memory store.
//!
//! Scripts are parsed with `sqlparser` and reduced to the handful of
//! structural statements shadow-table scripts need.

use super::table::Column;
use crate::core::{DataType, DbError, Result, TableName};
use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::ast as sql_ast;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

lazy_static! {
    static ref TABLE_PRIMARY_KEY: Regex =
        Regex::new(r"(?i)PRIMARY\s+KEY[^(]*\(([^)]*)\)").expect("static regex");
}

#[derive(Debug, Clone)]
pub enum DdlStatement {
    CreateTable {
        table: TableName,
        columns: Vec<Column>,
        primary_key: Vec<String>,
        if_not_exists: bool,
    },
    AddColumn {
        table: TableName,
        column: Column,
    },
    CreateIndex {
        table: TableName,
        name: String,
        column: String,
        if_not_exists: bool,
    },
    DropTable {
        table: TableName,
        if_exists: bool,
    },
}

pub fn parse_ddl(sql: &str) -> Result<Vec<DdlStatement>> {
    let dialect = GenericDialect {};
    let statements =
        Parser::parse_sql(&dialect, sql).map_err(|e| DbError::ParseError(e.to_string()))?;

    statements.into_iter().map(convert_statement).collect()
}

fn convert_statement(stmt: sql_ast::Statement) -> Result<DdlStatement> {
    match stmt {
        sql_ast::Statement::CreateTable(create) => convert_create_table(create),
        sql_ast::Statement::CreateIndex(ci) => convert_create_index(&ci),
        sql_ast::Statement::AlterTable { name, operations, .. } => {
            let mut operations = operations.into_iter();
            match (operations.next(), operations.next()) {
                (Some(operation), None) => convert_alter_table(&name, operation),
                _ => Err(DbError::UnsupportedOperation(
                    "Only single ALTER TABLE operation supported".into(),
                )),
            }
        }
        sql_ast::Statement::Drop {
            object_type,
            names,
            if_exists,
            ..
        } => {
            if !matches!(object_type, sql_ast::ObjectType::Table) {
                return Err(DbError::UnsupportedOperation(format!(
                    "Only DROP TABLE supported, got: {:?}",
                    object_type
                )));
            }
            match names.as_slice() {
                [name] => Ok(DdlStatement::DropTable {
                    table: table_name(name)?,
                    if_exists,
                }),
                _ => Err(DbError::UnsupportedOperation(
                    "Only single table DROP supported".into(),
                )),
            }
        }
        other => Err(DbError::UnsupportedOperation(format!(
            "Statement type not supported by the in-memory store: {}",
            other
        ))),
    }
}

fn convert_create_table(create: sql_ast::CreateTable) -> Result<DdlStatement> {
    let table = table_name(&create.name)?;
    let mut primary_key = Vec::new();
    let mut columns = Vec::with_capacity(create.columns.len());

    for col in create.columns {
        if col
            .options
            .iter()
            .any(|opt| opt.option.to_string().to_ascii_uppercase().starts_with("PRIMARY KEY"))
        {
            primary_key.push(col.name.value.clone());
        }
        columns.push(convert_column_def(col));
    }

    for constraint in &create.constraints {
        let rendered = constraint.to_string();
        if let Some(caps) = TABLE_PRIMARY_KEY.captures(&rendered) {
            primary_key = caps[1].split(',').map(unquote).collect();
        }
    }

    for key in &primary_key {
        if let Some(col) = columns.iter_mut().find(|c| &c.name == key) {
            col.nullable = false;
        }
    }

    Ok(DdlStatement::CreateTable {
        table,
        columns,
        primary_key,
        if_not_exists: create.if_not_exists,
    })
}

fn convert_column_def(col: sql_ast::ColumnDef) -> Column {
    let nullable = !col
        .options
        .iter()
        .any(|opt| matches!(opt.option, sql_ast::ColumnOption::NotNull));

    let column = Column::new(col.name.value, DataType::from_sql_type(&col.data_type.to_string()));
    if nullable { column } else { column.not_null() }
}

fn convert_create_index(ci: &sql_ast::CreateIndex) -> Result<DdlStatement> {
    let name = match &ci.name {
        Some(n) => table_name(n)?.name().to_string(),
        None => return Err(DbError::ParseError("Index name is required".into())),
    };

    if ci.columns.len() != 1 {
        return Err(DbError::UnsupportedOperation(
            "Multi-column indexes are not supported".into(),
        ));
    }

    let column = match &ci.columns[0].column.expr {
        sql_ast::Expr::Identifier(ident) => ident.value.clone(),
        _ => {
            return Err(DbError::UnsupportedOperation(
                "Index column must be an identifier".into(),
            ));
        }
    };

    Ok(DdlStatement::CreateIndex {
        table: table_name(&ci.table_name)?,
        name,
        column,
        if_not_exists: ci.if_not_exists,
    })
}

fn convert_alter_table(
    name: &sql_ast::ObjectName,
    operation: sql_ast::AlterTableOperation,
) -> Result<DdlStatement> {
    match operation {
        sql_ast::AlterTableOperation::AddColumn { column_def, .. } => Ok(DdlStatement::AddColumn {
            table: table_name(name)?,
            column: convert_column_def(column_def),
        }),
        other => Err(DbError::UnsupportedOperation(format!(
            "Unsupported ALTER TABLE operation: {}",
            other
        ))),
    }
}

fn table_name(name: &sql_ast::ObjectName) -> Result<TableName> {
    let parts: Vec<String> = name.0.iter().map(|part| unquote(&part.to_string())).collect();
    match parts.as_slice() {
        [table] => Ok(TableName::new(table.as_str())),
        [.., schema, table] => Ok(TableName::qualified(schema.as_str(), table.as_str())),
        [] => Err(DbError::ParseError("Invalid table name".into())),
    }
}

fn unquote(ident: &str) -> String {
    ident.trim().trim_matches(|c| c == '"' || c == '`').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_table_with_column_key() {
        let stmts = parse_ddl(
            "CREATE TABLE IF NOT EXISTS audit.audit_users (id INTEGER PRIMARY KEY, payload TEXT NOT NULL, raw BLOB)",
        )
        .unwrap();

        let DdlStatement::CreateTable { table, columns, primary_key, if_not_exists } = &stmts[0]
        else {
            panic!("expected CREATE TABLE");
        };
        assert_eq!(table, &TableName::qualified("audit", "audit_users"));
        assert_eq!(primary_key, &vec!["id".to_string()]);
        assert!(if_not_exists);
        assert_eq!(columns[2].data_type, DataType::Bytes);
        assert!(!columns[1].nullable);
    }

    #[test]
    fn test_parse_table_level_composite_key() {
        let stmts = parse_ddl(
            "CREATE TABLE registry (schema_name TEXT NOT NULL, table_name TEXT NOT NULL, version INTEGER, PRIMARY KEY (schema_name, table_name))",
        )
        .unwrap();
        let DdlStatement::CreateTable { primary_key, .. } = &stmts[0] else {
            panic!("expected CREATE TABLE");
        };
        assert_eq!(primary_key, &vec!["schema_name".to_string(), "table_name".to_string()]);
    }

    #[test]
    fn test_parse_multi_statement_script() {
        let stmts = parse_ddl(
            "ALTER TABLE audit_users ADD COLUMN request TEXT; CREATE INDEX idx_audit_users_pk ON audit_users (primary_id);",
        )
        .unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[0], DdlStatement::AddColumn { column, .. } if column.name == "request"));
        assert!(matches!(&stmts[1], DdlStatement::CreateIndex { name, .. } if name == "idx_audit_users_pk"));
    }

    #[test]
    fn test_rejects_dml() {
        let err = parse_ddl("DELETE FROM audit_users").unwrap_err();
        assert!(matches!(err, DbError::UnsupportedOperation(_)));
    }
}
