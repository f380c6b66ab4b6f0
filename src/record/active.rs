//! Row-backed entities: construction through the cache, change-tracked field
//! access and ordered save.

use super::context::RecordContext;
use super::fields::EntityDescriptor;
use super::tracker::ChangeTracker;
use super::validation::ValidationErrors;
use crate::core::{DbError, Record, Result, RowKey, Value};
use crate::storage::InsertMode;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// One logical row, loaded or about to be inserted.
#[derive(Clone)]
pub struct ActiveRecord {
    descriptor: Arc<EntityDescriptor>,
    ctx: RecordContext,
    fields: Record,
    tracker: ChangeTracker,
    /// Identity the row had when loaded or last saved.
    key: Option<RowKey>,
    persisted: bool,
}

impl ActiveRecord {
    /// A fresh record holding the declared defaults. Touches neither store nor cache.
    pub fn new(descriptor: Arc<EntityDescriptor>, ctx: RecordContext) -> Self {
        let fields = descriptor.defaults();
        Self {
            descriptor,
            ctx,
            fields,
            tracker: ChangeTracker::new(),
            key: None,
            persisted: false,
        }
    }

    /// A fresh record with `defaults` assigned over the declared ones.
    /// Values that differ from the declaration are dirty.
    pub fn with_defaults(
        descriptor: Arc<EntityDescriptor>,
        ctx: RecordContext,
        defaults: Record,
    ) -> Result<Self> {
        let mut record = Self::new(descriptor, ctx);
        for (field, value) in defaults {
            record.set(&field, value)?;
        }
        Ok(record)
    }

    /// Loads the row addressed by `key`: cache first, then the store.
    ///
    /// An empty key (NULL, 0, empty text) behaves like `with_defaults`. A key
    /// with no row fails with `ConstructionFailed`, unless the entity is
    /// insert-on-absent, in which case the record starts from `defaults`
    /// with the key fields assigned.
    pub async fn load(
        descriptor: Arc<EntityDescriptor>,
        ctx: RecordContext,
        key: impl Into<RowKey>,
        defaults: Option<Record>,
    ) -> Result<Self> {
        let key = key.into();
        if key.is_empty_id() {
            return Self::with_defaults(descriptor, ctx, defaults.unwrap_or_default());
        }
        let key_columns = descriptor.primary_keys();
        let bound = key.bind(&key_columns)?;
        for (column, value) in &bound {
            descriptor.check_value(column, value)?;
        }
        let span = info_span!("record.load", entity = descriptor.type_name(), key = %key);

        Self::fetch(descriptor, ctx, key, bound, defaults)
            .instrument(span)
            .await
    }

    async fn fetch(
        descriptor: Arc<EntityDescriptor>,
        ctx: RecordContext,
        key: RowKey,
        bound: Vec<(String, Value)>,
        defaults: Option<Record>,
    ) -> Result<Self> {
        let entity = descriptor.type_name().to_string();
        if let Some(cache) = ctx.cache()
            && let Some(fields) = cache.load(&entity, &key.cache_field()).await
        {
            return Ok(Self::populated(descriptor, ctx, key, fields));
        }

        match ctx.store().fetch_row(descriptor.table(), &bound).await? {
            Some(row) => {
                let record = Self::populated(descriptor, ctx, key, row);
                if let Some(cache) = record.ctx.cache() {
                    cache.store(&entity, &record.cache_field(), &record.fields).await;
                }
                Ok(record)
            }
            None if descriptor.is_insert_on_absent() => {
                event!(Level::DEBUG, "no row, starting insertable record");
                let mut record =
                    Self::with_defaults(descriptor, ctx, defaults.unwrap_or_default())?;
                for (column, value) in bound {
                    record.set(&column, value)?;
                }
                record.key = Some(key);
                Ok(record)
            }
            None => Err(DbError::ConstructionFailed {
                entity,
                key: key.to_string(),
            }),
        }
    }

    fn populated(
        descriptor: Arc<EntityDescriptor>,
        ctx: RecordContext,
        key: RowKey,
        row: Record,
    ) -> Self {
        let mut record = Self::new(descriptor, ctx);
        record.absorb(row);
        record.key = Some(key);
        record.persisted = true;
        record
    }

    /// Replaces declared field values with those present in `row`; columns
    /// the entity does not declare are dropped.
    fn absorb(&mut self, mut row: Record) {
        for field in self.descriptor.fields() {
            if let Some(value) = row.remove(&field.name) {
                self.fields.insert(field.name.clone(), value);
            }
        }
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    pub fn context(&self) -> &RecordContext {
        &self.ctx
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn value(&self, field: &str) -> Result<&Value> {
        self.fields.get(field).ok_or_else(|| DbError::UnknownField {
            entity: self.descriptor.type_name().to_string(),
            field: field.to_string(),
        })
    }

    /// Assigns a field. Returns whether the value changed; only a change
    /// marks the field dirty.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        self.descriptor.check_value(field, &value)?;
        let current = self.fields.get(field).cloned().unwrap_or(Value::Null);
        let changed = self.tracker.observe(field, &current, &value);
        self.fields.insert(field.to_string(), value);
        Ok(changed)
    }

    pub fn fields(&self) -> &Record {
        &self.fields
    }

    pub fn field_keys(&self) -> Vec<&str> {
        self.descriptor.field_keys()
    }

    pub fn has_changed(&self) -> bool {
        self.tracker.has_changes()
    }

    pub fn is_changed(&self, field: &str) -> bool {
        self.tracker.is_dirty(field)
    }

    pub fn changed_fields(&self) -> Vec<&str> {
        self.tracker.changed_fields()
    }

    pub fn key(&self) -> Option<&RowKey> {
        self.key.as_ref()
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    fn cache_field(&self) -> String {
        self.key
            .as_ref()
            .map(RowKey::cache_field)
            .unwrap_or_default()
    }

    /// Writes the changed fields. Returns `false`, touching nothing, when no
    /// field changed.
    ///
    /// Order: before-image, write, after-image, audit log, cache refresh.
    /// A failing step aborts the rest and leaves the dirty set in place.
    pub async fn save(&mut self) -> Result<bool> {
        if !self.tracker.has_changes() {
            event!(Level::DEBUG, entity = self.descriptor.type_name(), "nothing to save");
            return Ok(false);
        }

        let span = info_span!(
            "record.save",
            entity = self.descriptor.type_name(),
            changed = self.tracker.changed_fields().len()
        );
        self.save_changes().instrument(span).await?;
        self.tracker.clear();
        Ok(true)
    }

    async fn save_changes(&mut self) -> Result<()> {
        let store = self.ctx.store().clone();
        let table = self.descriptor.table().clone();
        let audited = self
            .ctx
            .audit()
            .is_some_and(|writer| writer.is_enabled() && self.descriptor.is_audited());

        let before = match (&self.key, self.persisted, audited) {
            (Some(key), true, true) => store.fetch_row(&table, &self.bind(key)?).await?,
            _ => None,
        };

        if self.persisted {
            let key = self.key.clone().ok_or_else(|| {
                DbError::ExecutionError("Persisted record without a key".to_string())
            })?;
            let changes: Record = self
                .tracker
                .changed_fields()
                .into_iter()
                .filter_map(|f| self.fields.get(f).map(|v| (f.to_string(), v.clone())))
                .collect();
            let touched = store.update_row(&table, &self.bind(&key)?, &changes).await?;
            if touched == 0 {
                return Err(DbError::ExecutionError(format!(
                    "No '{}' row with key {} to update",
                    self.descriptor.type_name(),
                    key
                )));
            }
        } else {
            let mut values = self.fields.clone();
            let auto_key = self.descriptor.auto_key_field().map(str::to_string);
            if let Some(column) = &auto_key
                && values
                    .get(column)
                    .is_none_or(|v| RowKey::Single(v.clone()).is_empty_id())
            {
                values.remove(column);
            }
            let assigned = store.insert_row(&table, &values, InsertMode::Upsert).await?;
            if let (Some(column), Some(id)) = (auto_key, assigned) {
                self.fields.insert(column, Value::Integer(id));
            }
            self.persisted = true;
        }

        // The row is written, so the cached snapshot is stale even if a later step fails.
        let previous_key = self.key.clone();
        let outcome = self.after_write(before).await;
        self.purge_keys(previous_key.as_ref()).await;
        let after = outcome?;

        if let (Some(cache), Some(key)) = (self.ctx.cache(), &self.key)
            && self.ctx.config().recache_on_save
        {
            cache
                .store(self.descriptor.type_name(), &key.cache_field(), &after)
                .await;
        }
        Ok(())
    }

    /// Adopts the post-write key, reads the after-image and logs the diff.
    async fn after_write(&mut self, before: Option<Record>) -> Result<Record> {
        let table = self.descriptor.table().clone();
        // Key fields may have been assigned or changed by the write.
        let key = self.descriptor.key_of(&self.fields).ok_or_else(|| {
            DbError::InvalidInput(format!(
                "'{}' saved without a usable key ({})",
                self.descriptor.type_name(),
                self.descriptor.primary_keys().join(", ")
            ))
        })?;
        self.key = Some(key.clone());

        let after = self
            .ctx
            .store()
            .fetch_row(&table, &self.bind(&key)?)
            .await?
            .unwrap_or_else(|| self.fields.clone());

        if let (Some(writer), Some(before)) = (self.ctx.audit(), before.as_ref())
            && writer.is_enabled()
            && self.descriptor.is_audited()
        {
            writer
                .store_log_with(self.ctx.scope(), table.name(), &key, before, &after, None)
                .await?;
        }
        Ok(after)
    }

    /// Drops the entries for the current key and, if it moved, the old one.
    async fn purge_keys(&self, previous: Option<&RowKey>) {
        let Some(cache) = self.ctx.cache() else {
            return;
        };
        let entity = self.descriptor.type_name();
        if let Some(old) = previous.filter(|old| Some(*old) != self.key.as_ref()) {
            cache.purge(entity, &old.cache_field()).await;
        }
        if let Some(key) = &self.key {
            cache.purge(entity, &key.cache_field()).await;
        }
    }

    fn bind(&self, key: &RowKey) -> Result<Vec<(String, Value)>> {
        key.bind(&self.descriptor.primary_keys())
    }

    /// Drops this record's cache entry, then writes a fresh snapshot of the
    /// in-memory state if `recache_after_purge` is on.
    pub async fn purge_cache(&self) {
        let (Some(cache), Some(key)) = (self.ctx.cache(), &self.key) else {
            return;
        };
        let entity = self.descriptor.type_name();
        cache.purge(entity, &key.cache_field()).await;
        if self.ctx.config().recache_after_purge {
            cache.store(entity, &key.cache_field(), &self.fields).await;
        }
    }
}

/// A typed entity wrapping an `ActiveRecord`, as emitted by the entity
/// generator or written by hand.
pub trait EntityModel: Sized {
    fn descriptor() -> Arc<EntityDescriptor>;

    fn from_record(record: ActiveRecord) -> Self;

    fn record(&self) -> &ActiveRecord;

    fn record_mut(&mut self) -> &mut ActiveRecord;

    /// Entity-level checks run by `save_model` before anything is written.
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        Ok(())
    }
}

pub async fn load_model<E: EntityModel>(ctx: &RecordContext, key: impl Into<RowKey>) -> Result<E> {
    let record = ActiveRecord::load(E::descriptor(), ctx.clone(), key, None).await?;
    Ok(E::from_record(record))
}

pub fn new_model<E: EntityModel>(ctx: &RecordContext) -> E {
    E::from_record(ActiveRecord::new(E::descriptor(), ctx.clone()))
}

/// Validates, then saves.
pub async fn save_model<E: EntityModel>(model: &mut E) -> Result<bool> {
    model.validate()?;
    model.record_mut().save().await
}
