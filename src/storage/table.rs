use crate::core::{DataType, DbError, Record, Result, Value};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(DbError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
    primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>, primary_key: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|col| col.name == name)
    }

    /// A lone INTEGER primary key is assigned by the table when omitted.
    fn auto_increment_column(&self) -> Option<&str> {
        match self.primary_key.as_slice() {
            [only] => self
                .get_column(only)
                .filter(|col| col.data_type == DataType::Integer)
                .map(|col| col.name.as_str()),
            _ => None,
        }
    }
}

/// Whether an insert that collides with an existing key fails or merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    Insert,
    Upsert,
}

#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<String, Record>,
    next_row_id: i64,
    /// index name -> column
    indexes: HashMap<String, String>,
    comment: Option<String>,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 1,
            indexes: HashMap::new(),
            comment: None,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = Some(comment.into());
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = &Record> {
        self.rows.values()
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    pub fn get(&self, key: &[(String, Value)]) -> Result<Option<Record>> {
        let row_key = self.key_from_pairs(key)?;
        Ok(self.rows.get(&row_key).cloned())
    }

    /// Inserts a row, filling omitted columns with NULL. Returns the
    /// integer key of the row when the table has a single INTEGER key.
    pub fn insert(&mut self, values: &Record, mode: InsertMode) -> Result<Option<i64>> {
        let mut row = Record::new();
        for name in values.keys() {
            if self.schema.get_column(name).is_none() {
                return Err(DbError::ColumnNotFound(name.clone(), self.schema.name.clone()));
            }
        }

        let auto_column = self.schema.auto_increment_column().map(str::to_string);
        for column in &self.schema.columns {
            let mut value = values.get(&column.name).cloned().unwrap_or(Value::Null);
            if value.is_null() && auto_column.as_deref() == Some(column.name.as_str()) {
                value = Value::Integer(self.next_row_id);
            }
            column.validate(&value)?;
            row.insert(column.name.clone(), value);
        }

        let row_key = self.key_from_record(&row)?;
        let inserted_id = auto_column
            .as_deref()
            .and_then(|col| row.get(col))
            .and_then(Value::as_i64);
        if let Some(id) = inserted_id {
            self.next_row_id = self.next_row_id.max(id + 1);
        }

        match self.rows.get_mut(&row_key) {
            Some(existing) => match mode {
                InsertMode::Insert => {
                    return Err(DbError::ConstraintViolation(format!(
                        "Duplicate primary key {} in table '{}'",
                        row_key, self.schema.name
                    )));
                }
                InsertMode::Upsert => {
                    for (name, value) in values {
                        existing.insert(name.clone(), value.clone());
                    }
                }
            },
            None => {
                self.rows.insert(row_key, row);
            }
        }

        Ok(inserted_id)
    }

    pub fn update(&mut self, key: &[(String, Value)], changes: &Record) -> Result<u64> {
        for (name, value) in changes {
            let column = self
                .schema
                .get_column(name)
                .ok_or_else(|| DbError::ColumnNotFound(name.clone(), self.schema.name.clone()))?;
            column.validate(value)?;
        }

        let row_key = self.key_from_pairs(key)?;
        let Some(mut row) = self.rows.get(&row_key).cloned() else {
            return Ok(0);
        };
        for (name, value) in changes {
            row.insert(name.clone(), value.clone());
        }
        let new_key = self.key_from_record(&row)?;
        if new_key != row_key && self.rows.contains_key(&new_key) {
            return Err(DbError::ConstraintViolation(format!(
                "Duplicate primary key {} in table '{}'",
                new_key, self.schema.name
            )));
        }
        self.rows.remove(&row_key);
        self.rows.insert(new_key, row);
        Ok(1)
    }

    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if self.schema.get_column(&column.name).is_some() {
            return Err(DbError::DuplicateStructure {
                table: self.schema.name.clone(),
                element: format!("column '{}'", column.name),
            });
        }
        for row in self.rows.values_mut() {
            row.insert(column.name.clone(), Value::Null);
        }
        self.schema.columns.push(column);
        Ok(())
    }

    pub fn create_index(&mut self, name: &str, column: &str, if_not_exists: bool) -> Result<()> {
        if self.indexes.contains_key(name) {
            if if_not_exists {
                return Ok(());
            }
            return Err(DbError::DuplicateStructure {
                table: self.schema.name.clone(),
                element: format!("index '{}'", name),
            });
        }
        if self.schema.get_column(column).is_none() {
            return Err(DbError::ColumnNotFound(column.to_string(), self.schema.name.clone()));
        }
        self.indexes.insert(name.to_string(), column.to_string());
        Ok(())
    }

    fn key_from_pairs(&self, key: &[(String, Value)]) -> Result<String> {
        let pk = &self.schema.primary_key;
        if pk.is_empty() {
            return Err(DbError::UnsupportedOperation(format!(
                "Table '{}' has no primary key",
                self.schema.name
            )));
        }
        let mut parts = Vec::with_capacity(pk.len());
        for column in pk {
            let value = key
                .iter()
                .find(|(name, _)| name == column)
                .map(|(_, value)| value)
                .ok_or_else(|| {
                    DbError::InvalidInput(format!(
                        "Key for table '{}' is missing column '{}'",
                        self.schema.name, column
                    ))
                })?;
            parts.push(value.clone().into_scalar());
        }
        Ok(serde_json::to_string(&parts)?)
    }

    fn key_from_record(&self, row: &Record) -> Result<String> {
        if self.schema.primary_key.is_empty() {
            // keyless tables behave like heaps
            return Ok(format!("#{}", self.rows.len()));
        }
        let pairs: Vec<(String, Value)> = self
            .schema
            .primary_key
            .iter()
            .map(|col| (col.clone(), row.get(col).cloned().unwrap_or(Value::Null)))
            .collect();
        self.key_from_pairs(&pairs)
    }
}
