//! End-to-end document lifecycle: save, change tracking, reload and delete,
//! run against the in-memory driver.

use std::sync::Arc;

use docmap_core::logging::setup_logging;
use docmap_core::{DocmapError, Settings};
use docmap_odm::fields::{FieldDef, FieldType};
use docmap_odm::registry;
use docmap_odm::schema::{Schema, SchemaBuilder};
use docmap_odm::value::{Json, Value};
use docmap_odm::{save_shared, Document, Manager, SaveOptions, Q};
use docmap_test::{MemoryDriver, OpKind};
use serde_json::json;

fn init() {
    setup_logging(&Settings {
        log_level: "docmap_odm=debug".to_string(),
        ..Settings::default()
    });
}

fn address() -> Arc<Schema> {
    SchemaBuilder::embedded("LifeAddress")
        .field(FieldDef::new("city", FieldType::string()).db_field("c"))
        .field(FieldDef::new("zip", FieldType::string()))
        .build()
        .unwrap()
}

fn person() -> Arc<Schema> {
    let schema = SchemaBuilder::document("LifePerson")
        .field(FieldDef::new("name", FieldType::string()).required())
        .field(FieldDef::new("age", FieldType::int()))
        .field(FieldDef::new("email", FieldType::string()).unique())
        .field(FieldDef::new("address", FieldType::Embedded(address())))
        .build()
        .unwrap();
    registry::register(&schema);
    schema
}

fn post() -> Arc<Schema> {
    let schema = SchemaBuilder::document("LifePost")
        .field(FieldDef::new("title", FieldType::string()))
        .field(FieldDef::new("tags", FieldType::list(FieldType::string())))
        .build()
        .unwrap();
    registry::register(&schema);
    schema
}

fn ada() -> Document {
    Document::new(&person(), [("name", Value::from("Ada")), ("age", Value::from(20))])
}

#[tokio::test]
async fn test_saved_person_records_only_the_changed_age() {
    init();
    let driver = MemoryDriver::new();
    let db = driver.database();
    let mut p = ada();
    p.save(&db).await.unwrap();
    assert!(!p.is_created());
    assert!(p.pk().is_some_and(|pk| !pk.is_null()));

    p.set("age", 21).unwrap();
    let (set, unset) = p.delta();
    assert_eq!(Json::Object(set), json!({"age": 21}));
    assert!(unset.is_empty());

    driver.reset_counts();
    p.save(&db).await.unwrap();
    assert_eq!(driver.op_count(OpKind::Update), 1);
    assert_eq!(driver.op_count(OpKind::Insert), 0);
    let stored = driver.documents("life_person");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["age"], json!(21));
    assert_eq!(stored[0]["name"], json!("Ada"));

    let (set, unset) = p.delta();
    assert!(set.is_empty() && unset.is_empty());
}

#[tokio::test]
async fn test_unchanged_save_does_not_reach_the_driver() {
    let driver = MemoryDriver::new();
    let db = driver.database();
    let mut p = ada();
    p.save(&db).await.unwrap();
    driver.reset_counts();
    p.save(&db).await.unwrap();
    assert_eq!(driver.total_ops(), 0);
}

#[tokio::test]
async fn test_emptied_list_is_unset() {
    let driver = MemoryDriver::new();
    let db = driver.database();
    let mut p = Document::new(&post(), [("tags", Value::list(["a"]))]);
    p.save(&db).await.unwrap();

    p.set("tags", Value::list(Vec::<Value>::new())).unwrap();
    let (set, unset) = p.delta();
    assert!(set.is_empty());
    assert_eq!(Json::Object(unset), json!({"tags": 1}));

    p.save(&db).await.unwrap();
    let stored = driver.documents("life_post");
    assert!(!stored[0].contains_key("tags"));
}

#[tokio::test]
async fn test_fresh_load_has_no_delta() {
    let driver = MemoryDriver::new();
    driver.seed(
        "life_person",
        [json!({"_id": "p1", "name": "Ada", "age": 30, "address": {"c": "Paris"}})],
    );
    let db = driver.database();
    let loaded = Manager::new(&person(), &db).all().first().await.unwrap().unwrap();
    let doc = loaded.borrow();
    let (set, unset) = doc.delta();
    assert!(set.is_empty());
    assert!(unset.is_empty());
    assert!(doc.get_changed_fields().is_empty());
}

#[tokio::test]
async fn test_change_marking_is_idempotent() {
    let driver = MemoryDriver::new();
    let db = driver.database();
    let mut p = ada();
    p.save(&db).await.unwrap();
    p.set("age", 30).unwrap();
    p.set("age", 30).unwrap();
    assert_eq!(p.get_changed_fields(), vec!["age".to_string()]);
}

#[tokio::test]
async fn test_embedded_change_is_sent_as_dotted_path() {
    let driver = MemoryDriver::new();
    let db = driver.database();
    let home = Document::new(&address(), [("city", "Paris"), ("zip", "75001")]);
    let mut p = Document::new(&person(), [("name", Value::from("Ada")), ("address", Value::from(home))]);
    p.save(&db).await.unwrap();

    let loaded = Manager::new(&person(), &db).all().first().await.unwrap().unwrap();
    loaded
        .borrow_mut()
        .embedded_mut("address")
        .unwrap()
        .set("city", "Lyon")
        .unwrap();
    let (set, _) = loaded.borrow().delta();
    assert_eq!(Json::Object(set), json!({"address.c": "Lyon"}));
    save_shared(&loaded, &db, SaveOptions::default()).await.unwrap();
    assert_eq!(
        driver.documents("life_person")[0]["address"],
        json!({"c": "Lyon", "zip": "75001"})
    );
}

#[tokio::test]
async fn test_wire_round_trip_through_the_store() {
    let driver = MemoryDriver::new();
    let db = driver.database();
    let home = Document::new(&address(), [("city", "Paris")]);
    let mut p = Document::new(
        &person(),
        [
            ("name", Value::from("Ada")),
            ("age", Value::from(36)),
            ("address", Value::from(home)),
        ],
    );
    p.save(&db).await.unwrap();

    let rebuilt = Document::from_wire(&person(), &p.to_wire()).unwrap();
    assert_eq!(rebuilt, p);

    let loaded = Manager::new(&person(), &db).all().first().await.unwrap().unwrap();
    assert_eq!(*loaded.borrow(), p);
}

#[tokio::test]
async fn test_reload_picks_up_server_side_changes() {
    let driver = MemoryDriver::new();
    let db = driver.database();
    let mut p = ada();
    p.save(&db).await.unwrap();

    let changed = Manager::new(&person(), &db)
        .filter(Q::kw("name", "Ada"))
        .update([("inc__age", 5)])
        .await
        .unwrap();
    assert_eq!(changed, 1);

    p.reload(&db).await.unwrap();
    assert_eq!(p.get("age"), Some(&Value::Int(25)));
    assert!(p.get_changed_fields().is_empty());
}

#[tokio::test]
async fn test_delete_then_reload_is_does_not_exist() {
    let driver = MemoryDriver::new();
    let db = driver.database();
    let mut p = ada();
    p.save(&db).await.unwrap();
    let mut other = Document::new(&person(), [("name", "Bob")]);
    other.save(&db).await.unwrap();

    assert_eq!(p.delete(&db).await.unwrap(), 1);
    assert_eq!(Manager::new(&person(), &db).all().count(false).await.unwrap(), 1);

    let err = p.reload(&db).await.unwrap_err();
    assert!(err.is_does_not_exist_for("LifePerson"));
    assert!(!err.is_does_not_exist_for("LifePost"));
}

#[tokio::test]
async fn test_unique_violation_is_not_unique() {
    let driver = MemoryDriver::new();
    let db = driver.database();
    db.ensure_indexes(&person()).await.unwrap();

    let mut first = Document::new(&person(), [("name", "Ada"), ("email", "ada@example.com")]);
    first.save(&db).await.unwrap();
    let mut second = Document::new(&person(), [("name", "Eve"), ("email", "ada@example.com")]);
    let err = second.save(&db).await.unwrap_err();
    assert!(matches!(err, DocmapError::NotUnique(_)));
    assert_eq!(driver.documents("life_person").len(), 1);
}

#[tokio::test]
async fn test_invalid_document_is_not_written() {
    let driver = MemoryDriver::new();
    let db = driver.database();
    let mut nameless = Document::new(&person(), [("age", 3)]);
    let err = nameless.save(&db).await.unwrap_err();
    assert!(matches!(err, DocmapError::ValidationError(_)));
    assert_eq!(driver.op_count(OpKind::Insert), 0);

    nameless
        .save_with(&db, SaveOptions { validate: false })
        .await
        .unwrap();
    assert_eq!(driver.documents("life_person").len(), 1);
}

#[tokio::test]
async fn test_shared_documents_save_in_place() {
    let driver = MemoryDriver::new();
    driver.seed("life_person", [json!({"_id": "p1", "name": "Ada", "age": 30})]);
    let db = driver.database();
    let loaded = Manager::new(&person(), &db)
        .all()
        .get(Q::kw("pk", "p1"))
        .await
        .unwrap();
    loaded.borrow_mut().set("age", 31).unwrap();
    save_shared(&loaded, &db, SaveOptions::default()).await.unwrap();
    assert_eq!(driver.documents("life_person")[0]["age"], json!(31));
    assert!(loaded.borrow().get_changed_fields().is_empty());
}
