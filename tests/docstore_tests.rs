//! Integration tests for the JSON document store.

use connkit::ErrorKind;
use connkit::clients::{DocStore, Document};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

#[test]
fn test_documents_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app_db.json");

    let mut store = DocStore::open(&path).unwrap();
    store.use_table("queries");
    store.insert(doc(json!({"id": "q1", "sql_query": "SELECT 1"}))).unwrap();
    store.insert(doc(json!({"id": "q2", "sql_query": "SELECT 2"}))).unwrap();
    store.close().unwrap();

    let mut store = DocStore::open(&path).unwrap();
    assert_eq!(store.tables(), vec!["queries".to_string()]);
    store.use_table("queries");
    let all = store.all().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].1["id"], json!("q2"));

    // Ids continue after the highest stored id.
    assert_eq!(store.insert(doc(json!({"id": "q3"}))).unwrap(), 3);
}

#[test]
fn test_update_where_merges_fields() {
    let dir = TempDir::new().unwrap();
    let mut store = DocStore::open(&dir.path().join("db.json")).unwrap();
    store.use_table("queries");
    let id = store
        .insert(doc(json!({"id": "q1", "sql_query": "SELECT 1", "owner": "aladin"})))
        .unwrap();
    store.insert(doc(json!({"id": "q2", "sql_query": "SELECT 2"}))).unwrap();

    let updated = store
        .update_where("id", &json!("q1"), &doc(json!({"sql_query": "SELECT 42"})))
        .unwrap();

    assert_eq!(updated, vec![id]);
    let stored = store.get(id).unwrap().unwrap();
    assert_eq!(stored["sql_query"], json!("SELECT 42"));
    assert_eq!(stored["owner"], json!("aladin"));

    let none = store
        .update_where("id", &json!("missing"), &doc(json!({"x": 1})))
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn test_tables_are_independent() {
    let dir = TempDir::new().unwrap();
    let mut store = DocStore::open(&dir.path().join("db.json")).unwrap();

    store.use_table("a");
    store.insert(doc(json!({"n": 1}))).unwrap();
    store.use_table("b");
    assert_eq!(store.insert(doc(json!({"n": 2}))).unwrap(), 1);

    assert!(store.drop_table("a").unwrap());
    assert_eq!(store.all().unwrap().len(), 1);
    assert_eq!(store.tables(), vec!["b".to_string()]);
}

#[test]
fn test_corrupt_file_is_serialization_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.json");
    std::fs::write(&path, "{not json").unwrap();

    let err = DocStore::open(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Serialization);
}
