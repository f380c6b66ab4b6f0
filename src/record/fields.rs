use crate::core::{DataType, DbError, Record, Result, RowKey, TableName, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// One declared column of an entity.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub data_type: DataType,
    pub primary_key: bool,
    pub default: Value,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            primary_key: false,
            default: Value::Null,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }
}

/// Static metadata for an entity type: table, key columns and declared fields
/// in column order.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    type_name: String,
    table: TableName,
    fields: Vec<FieldDescriptor>,
    insert_on_absent: bool,
    audited: bool,
}

impl EntityDescriptor {
    pub fn new(type_name: impl Into<String>, table: TableName) -> Self {
        Self {
            type_name: type_name.into(),
            table,
            fields: Vec::new(),
            insert_on_absent: false,
            audited: true,
        }
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Loading a key with no row yields a fresh, insertable record instead of an error.
    pub fn insert_on_absent(mut self) -> Self {
        self.insert_on_absent = true;
        self
    }

    pub fn without_audit(mut self) -> Self {
        self.audited = false;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn is_insert_on_absent(&self) -> bool {
        self.insert_on_absent
    }

    pub fn is_audited(&self) -> bool {
        self.audited
    }

    pub fn field_keys(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn primary_keys(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| f.name.as_str())
            .collect()
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn defaults(&self) -> Record {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.default.clone()))
            .collect()
    }

    /// Store-assigned keys are only possible for a lone INTEGER key column.
    pub fn auto_key_field(&self) -> Option<&str> {
        match self.primary_keys().as_slice() {
            [only] => self
                .get_field(only)
                .filter(|f| f.data_type == DataType::Integer)
                .map(|f| f.name.as_str()),
            _ => None,
        }
    }

    /// Builds the key from the record's current key-field values.
    pub fn key_of(&self, fields: &Record) -> Option<RowKey> {
        let parts: Vec<Value> = self
            .primary_keys()
            .iter()
            .map(|name| fields.get(*name).cloned().unwrap_or(Value::Null))
            .collect();
        let key = match parts.len() {
            0 => return None,
            1 => RowKey::Single(parts.into_iter().next()?),
            _ => RowKey::Composite(parts),
        };
        (!key.is_empty_id()).then_some(key)
    }

    /// Checks that `value` may be stored in `field`.
    pub fn check_value(&self, field: &str, value: &Value) -> Result<()> {
        let descriptor = self.get_field(field).ok_or_else(|| DbError::UnknownField {
            entity: self.type_name.clone(),
            field: field.to_string(),
        })?;
        if !descriptor.data_type.is_compatible(value) {
            return Err(DbError::TypeMismatch(format!(
                "{}.{} expects {}, got {}",
                self.type_name,
                field,
                descriptor.data_type,
                value.type_name()
            )));
        }
        Ok(())
    }
}

/// Entity type name -> descriptor lookup, filled once at startup.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    entities: HashMap<String, Arc<EntityDescriptor>>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: EntityDescriptor) -> Arc<EntityDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.entities
            .insert(descriptor.type_name().to_string(), descriptor.clone());
        descriptor
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<EntityDescriptor>> {
        self.entities.get(type_name).cloned()
    }

    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
