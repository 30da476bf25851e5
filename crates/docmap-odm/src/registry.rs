//! Process-wide schema registry.
//!
//! Maps class names to compiled schemas so that `_cls` discriminators, generic
//! references and reference targets can be resolved at load time. Schemas are
//! registered explicitly once built; the registry never guesses.
//!
//! A collection is owned by the root schema of its inheritance chain. The
//! dereference engine uses [`schema_for_collection`] to turn a raw
//! `(collection, id)` marker into a typed document.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;

use crate::schema::Schema;

#[derive(Default)]
struct Registry {
    by_class: HashMap<String, Arc<Schema>>,
    collections: HashMap<String, String>,
    /// Collections claimed by schemas outside one inheritance chain.
    ambiguous: HashSet<String>,
}

impl Registry {
    /// Records `schema` as a candidate owner of its collection.
    fn claim(&mut self, schema: &Arc<Schema>) {
        let Some(collection) = schema.collection() else {
            return;
        };
        if schema.is_abstract() {
            return;
        }
        let owner = self
            .collections
            .get(collection)
            .and_then(|owner| self.by_class.get(owner));
        match owner {
            None => {
                self.collections
                    .insert(collection.to_string(), schema.class_name().to_string());
            }
            Some(owner) if schema.is_same_or_subclass_of(owner) => {}
            Some(owner) if owner.is_same_or_subclass_of(schema) => {
                self.collections
                    .insert(collection.to_string(), schema.class_name().to_string());
            }
            Some(owner) => {
                tracing::warn!(
                    collection,
                    owner = owner.class_name(),
                    other = schema.class_name(),
                    "collection claimed by unrelated schemas; raw references to it stay unresolved"
                );
                self.ambiguous.insert(collection.to_string());
            }
        }
    }
}

static REGISTRY: Lazy<RwLock<Registry>> = Lazy::new(|| RwLock::new(Registry::default()));

/// Registers a schema under its class name, replacing any previous entry.
///
/// The root of an inheritance chain owns the chain's collection, whichever
/// order the classes are registered in. Two unrelated schemas sharing a
/// collection make it ambiguous: [`schema_for_collection`] then returns `None`.
pub fn register(schema: &Arc<Schema>) {
    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    registry
        .by_class
        .insert(schema.class_name().to_string(), Arc::clone(schema));
    registry.claim(schema);
    tracing::debug!(
        class_name = schema.class_name(),
        collection = schema.collection().unwrap_or(""),
        "registered schema"
    );
}

/// Removes a schema. Returns `true` if it was registered.
pub fn unregister(class_name: &str) -> bool {
    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    let Some(removed) = registry.by_class.remove(class_name) else {
        return false;
    };
    if let Some(collection) = removed.collection() {
        registry.collections.remove(collection);
        registry.ambiguous.remove(collection);
        let remaining: Vec<Arc<Schema>> = registry
            .by_class
            .values()
            .filter(|schema| schema.collection() == Some(collection))
            .cloned()
            .collect();
        for schema in &remaining {
            registry.claim(schema);
        }
    }
    true
}

/// Looks up a schema by class name.
///
/// A short name (`Dog` for `Animal.Dog`) resolves as well, as long as exactly
/// one registered schema carries it.
pub fn resolve(class_name: &str) -> Option<Arc<Schema>> {
    let registry = REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
    if let Some(schema) = registry.by_class.get(class_name) {
        return Some(Arc::clone(schema));
    }
    let mut matches = registry
        .by_class
        .values()
        .filter(|schema| schema.name() == class_name);
    match (matches.next(), matches.next()) {
        (Some(schema), None) => Some(Arc::clone(schema)),
        _ => None,
    }
}

/// The class names of `class_name` and all registered descendants, the class
/// itself first.
pub fn subclasses(class_name: &str) -> Vec<String> {
    let registry = REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
    let prefix = format!("{class_name}.");
    let mut names: Vec<String> = registry
        .by_class
        .keys()
        .filter(|name| name.starts_with(&prefix))
        .cloned()
        .collect();
    names.sort();
    names.insert(0, class_name.to_string());
    names
}

/// The root schema registered for a collection, or `None` when the collection
/// is unknown or claimed by unrelated schemas.
pub fn schema_for_collection(collection: &str) -> Option<Arc<Schema>> {
    let registry = REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
    if registry.ambiguous.contains(collection) {
        return None;
    }
    let owner = registry.collections.get(collection)?;
    registry.by_class.get(owner).map(Arc::clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{FieldDef, FieldType};
    use crate::schema::SchemaBuilder;

    #[test]
    fn test_register_and_resolve() {
        let schema = SchemaBuilder::document("RegistryWidget")
            .field(FieldDef::new("name", FieldType::string()))
            .build()
            .unwrap();
        register(&schema);
        let found = resolve("RegistryWidget").unwrap();
        assert!(Arc::ptr_eq(&found, &schema));
        assert!(Arc::ptr_eq(
            &schema_for_collection("registry_widget").unwrap(),
            &schema
        ));
        assert!(unregister("RegistryWidget"));
        assert!(resolve("RegistryWidget").is_none());
        assert!(schema_for_collection("registry_widget").is_none());
    }

    #[test]
    fn test_subclasses_and_short_names() {
        let root = SchemaBuilder::document("RegistryShape")
            .allow_inheritance(true)
            .build()
            .unwrap();
        let circle = SchemaBuilder::document("RegistryCircle")
            .inherit(&root)
            .build()
            .unwrap();
        register(&root);
        register(&circle);

        assert_eq!(
            subclasses("RegistryShape"),
            vec!["RegistryShape", "RegistryShape.RegistryCircle"]
        );
        assert!(Arc::ptr_eq(&resolve("RegistryCircle").unwrap(), &circle));
        // The subclass shares the collection but the root keeps ownership.
        assert!(Arc::ptr_eq(
            &schema_for_collection("registry_shape").unwrap(),
            &root
        ));
    }

    #[test]
    fn test_root_registered_after_subclass_takes_collection() {
        let root = SchemaBuilder::document("RegistryVehicle")
            .allow_inheritance(true)
            .build()
            .unwrap();
        let car = SchemaBuilder::document("RegistryCar")
            .inherit(&root)
            .build()
            .unwrap();
        register(&car);
        register(&root);
        register(&car);
        assert!(Arc::ptr_eq(
            &schema_for_collection("registry_vehicle").unwrap(),
            &root
        ));
    }

    #[test]
    fn test_unrelated_schemas_make_collection_ambiguous() {
        let first = SchemaBuilder::document("RegistryLeft")
            .collection("registry_shared")
            .build()
            .unwrap();
        let second = SchemaBuilder::document("RegistryRight")
            .collection("registry_shared")
            .build()
            .unwrap();
        register(&first);
        register(&first);
        assert!(Arc::ptr_eq(
            &schema_for_collection("registry_shared").unwrap(),
            &first
        ));

        register(&second);
        assert!(schema_for_collection("registry_shared").is_none());
        // Class lookups are unaffected.
        assert!(Arc::ptr_eq(&resolve("RegistryRight").unwrap(), &second));

        assert!(unregister("RegistryLeft"));
        assert!(Arc::ptr_eq(
            &schema_for_collection("registry_shared").unwrap(),
            &second
        ));
    }
}
