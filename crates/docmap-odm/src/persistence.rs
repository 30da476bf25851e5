//! Document persistence: save, delete and reload.
//!
//! A new document (`is_created()`) is inserted whole. A persisted one sends
//! only its [`delta`](Document::delta) as a `$set` / `$unset` upsert keyed by
//! primary key and shard key. Either way the recorded changes are cleared
//! afterwards.
//!
//! The `*_shared` functions do the same for a [`DocumentRef`]. They never hold
//! the `RefCell` borrow across a driver call, so a resolved graph may point
//! back at the document being saved.

use std::sync::Arc;

use docmap_core::{DocmapError, DocmapResult};

use crate::document::Document;
use crate::driver::Database;
use crate::fields::FieldType;
use crate::schema::{Schema, ID_FIELD};
use crate::value::{DocumentRef, Json, Value, WireDoc};

/// Options for [`Document::save_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Run [`Document::validate`] first.
    pub validate: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self { validate: true }
    }
}

/// Where a document lives: its collection and the filter selecting it.
struct ObjectKey {
    collection: String,
    filter: WireDoc,
}

enum SavePlan {
    Insert { collection: String, wire: WireDoc },
    Update { key: ObjectKey, update: WireDoc },
    Unchanged,
}

enum SaveOutcome {
    Inserted(Option<Json>),
    Updated,
    Unchanged,
}

impl Document {
    /// Saves with validation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError`, `NotUnique` for duplicate keys, and other
    /// mapped driver errors.
    pub async fn save(&mut self, db: &Database) -> DocmapResult<()> {
        self.save_with(db, SaveOptions::default()).await
    }

    /// Saves with explicit options.
    ///
    /// # Errors
    ///
    /// As for [`Document::save`].
    pub async fn save_with(&mut self, db: &Database, options: SaveOptions) -> DocmapResult<()> {
        let plan = self.plan_save(options)?;
        let outcome = execute_save(db, plan).await?;
        self.apply_save(outcome)
    }

    /// Deletes the stored document; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `OperationError` when the document has no primary key.
    pub async fn delete(&self, db: &Database) -> DocmapResult<u64> {
        execute_delete(db, self.object_key()?).await
    }

    /// Replaces this instance's data with the stored document.
    ///
    /// # Errors
    ///
    /// Returns `DoesNotExist` when the document is gone.
    pub async fn reload(&mut self, db: &Database) -> DocmapResult<()> {
        let schema = Arc::clone(self.schema());
        let fresh = fetch_by_key(db, &schema, self.object_key()?).await?;
        self.replace_with(fresh);
        Ok(())
    }

    fn object_key(&self) -> DocmapResult<ObjectKey> {
        let schema = self.schema();
        let collection = schema.collection().ok_or_else(|| {
            DocmapError::OperationError(format!(
                "{} is not stored in a collection",
                schema.class_name()
            ))
        })?;
        let pk_field = schema.pk_field().ok_or_else(|| {
            DocmapError::OperationError(format!("{} has no primary key", schema.class_name()))
        })?;
        let pk = self.pk().filter(|pk| !pk.is_null()).ok_or_else(|| {
            DocmapError::OperationError(format!(
                "{} document has no primary key yet",
                schema.class_name()
            ))
        })?;
        let mut filter = WireDoc::new();
        filter.insert(pk_field.db_field.clone(), pk_field.to_wire(pk));
        for name in schema.shard_key() {
            if let (Some(field), Some(value)) = (schema.field(name), self.get(name)) {
                filter.insert(field.db_field.clone(), field.to_wire(value));
            }
        }
        Ok(ObjectKey {
            collection: collection.to_string(),
            filter,
        })
    }

    fn plan_save(&mut self, options: SaveOptions) -> DocmapResult<SavePlan> {
        if options.validate {
            self.validate()?;
        }
        if !self.is_created() {
            let (set, unset) = self.delta();
            if set.is_empty() && unset.is_empty() {
                return Ok(SavePlan::Unchanged);
            }
            let mut update = WireDoc::new();
            if !set.is_empty() {
                update.insert("$set".into(), Json::Object(set));
            }
            if !unset.is_empty() {
                update.insert("$unset".into(), Json::Object(unset));
            }
            return Ok(SavePlan::Update {
                key: self.object_key()?,
                update,
            });
        }

        let schema = Arc::clone(self.schema());
        let collection = schema.collection().ok_or_else(|| {
            DocmapError::OperationError(format!(
                "{} is not stored in a collection",
                schema.class_name()
            ))
        })?;
        if let Some(pk_field) = schema.pk_field() {
            let missing = self.pk().map_or(true, Value::is_null);
            if missing && matches!(pk_field.field_type, FieldType::ObjectId) {
                let id = uuid::Uuid::new_v4().to_string();
                self.set(&pk_field.name, id)?;
            }
        }
        Ok(SavePlan::Insert {
            collection: collection.to_string(),
            wire: self.to_wire(),
        })
    }

    fn apply_save(&mut self, outcome: SaveOutcome) -> DocmapResult<()> {
        if let SaveOutcome::Inserted(Some(id)) = outcome {
            let schema = Arc::clone(self.schema());
            if let Some(pk_field) = schema.pk_field() {
                if self.pk().map_or(true, Value::is_null) {
                    self.set(&pk_field.name, pk_field.to_native(&id))?;
                }
            }
        }
        self.clear_changes();
        self.mark_persisted();
        Ok(())
    }
}

async fn execute_save(db: &Database, plan: SavePlan) -> DocmapResult<SaveOutcome> {
    match plan {
        SavePlan::Insert { collection, wire } => {
            let ids = db.insert(&collection, vec![wire]).await?;
            tracing::debug!(collection = %collection, id = ?ids.first(), "document inserted");
            Ok(SaveOutcome::Inserted(ids.into_iter().next()))
        }
        SavePlan::Update { key, update } => {
            db.update(&key.collection, &key.filter, &update, true, false)
                .await?;
            tracing::debug!(
                collection = %key.collection,
                update = %Json::Object(update),
                "document updated"
            );
            Ok(SaveOutcome::Updated)
        }
        SavePlan::Unchanged => Ok(SaveOutcome::Unchanged),
    }
}

async fn execute_delete(db: &Database, key: ObjectKey) -> DocmapResult<u64> {
    let removed = db.remove(&key.collection, &key.filter, false).await?;
    tracing::debug!(collection = %key.collection, removed, "document deleted");
    Ok(removed)
}

async fn fetch_by_key(
    db: &Database,
    schema: &Arc<Schema>,
    key: ObjectKey,
) -> DocmapResult<Document> {
    let pk_db = schema
        .pk_field()
        .map_or(ID_FIELD, |field| field.db_field.as_str());
    let id = key.filter.get(pk_db).cloned().unwrap_or(Json::Null);
    let rows = db.find_by_ids(&key.collection, &[id]).await?;
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| DocmapError::does_not_exist(schema.class_name()))?;
    Document::from_wire(schema, &row)
}

/// Saves a shared document.
///
/// # Errors
///
/// As for [`Document::save`].
pub async fn save_shared(doc: &DocumentRef, db: &Database, options: SaveOptions) -> DocmapResult<()> {
    let plan = doc.borrow_mut().plan_save(options)?;
    let outcome = execute_save(db, plan).await?;
    doc.borrow_mut().apply_save(outcome)
}

/// Deletes a shared document.
///
/// # Errors
///
/// As for [`Document::delete`].
pub async fn delete_shared(doc: &DocumentRef, db: &Database) -> DocmapResult<u64> {
    let key = doc.borrow().object_key()?;
    execute_delete(db, key).await
}

/// Reloads a shared document in place.
///
/// # Errors
///
/// As for [`Document::reload`].
pub async fn reload_shared(doc: &DocumentRef, db: &Database) -> DocmapResult<()> {
    let (key, schema) = {
        let current = doc.borrow();
        (current.object_key()?, Arc::clone(current.schema()))
    };
    let fresh = fetch_by_key(db, &schema, key).await?;
    doc.borrow_mut().replace_with(fresh);
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::fields::FieldDef;
    use crate::schema::SchemaBuilder;

    fn person() -> Arc<Schema> {
        SchemaBuilder::document("PersistPerson")
            .field(FieldDef::new("name", FieldType::string()).required())
            .field(FieldDef::new("age", FieldType::int()))
            .shard_key(["name"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_document_plans_insert_with_generated_pk() {
        let mut doc = Document::new(&person(), [("name", Value::from("Ada"))]);
        let plan = doc.plan_save(SaveOptions::default()).unwrap();
        let SavePlan::Insert { collection, wire } = plan else {
            panic!("expected an insert");
        };
        assert_eq!(collection, "persist_person");
        let id = wire.get("_id").and_then(Json::as_str).unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
        assert_eq!(wire.get("name"), Some(&json!("Ada")));
    }

    #[test]
    fn test_validation_runs_first() {
        let mut doc = Document::new(&person(), Vec::<(&str, Value)>::new());
        assert!(matches!(
            doc.plan_save(SaveOptions::default()),
            Err(DocmapError::ValidationError(_))
        ));
        assert!(doc.plan_save(SaveOptions { validate: false }).is_ok());
    }

    #[test]
    fn test_persisted_document_plans_delta_update() {
        let wire = json!({"_id": "p1", "name": "Ada", "age": 30});
        let mut doc = Document::from_wire(&person(), wire.as_object().unwrap()).unwrap();
        assert!(matches!(
            doc.plan_save(SaveOptions { validate: false }).unwrap(),
            SavePlan::Unchanged
        ));

        doc.set("age", Value::Null).unwrap();
        let SavePlan::Update { key, update } = doc.plan_save(SaveOptions { validate: false }).unwrap()
        else {
            panic!("expected an update");
        };
        assert_eq!(Json::Object(key.filter), json!({"_id": "p1", "name": "Ada"}));
        assert_eq!(Json::Object(update), json!({"$unset": {"age": 1}}));
    }

    #[test]
    fn test_apply_save_clears_changes() {
        let mut doc = Document::new(&person(), [("name", Value::from("Ada"))]);
        doc.apply_save(SaveOutcome::Inserted(None)).unwrap();
        assert!(!doc.is_created());
        assert!(doc.get_changed_fields().is_empty());
        assert!(doc.set("name", "Bob").is_err());
    }

    #[test]
    fn test_object_key_needs_pk() {
        let doc = Document::new(&person(), [("name", Value::from("Ada"))]);
        assert!(matches!(doc.object_key(), Err(DocmapError::OperationError(_))));
    }
}
