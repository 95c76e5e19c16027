//! Integration tests for database state
//!
//! Tests membership, tombstones, generated ids, stamps, and the keys each
//! mutation reports as touched.

use std::sync::Arc;

use trellis_foundation::{Clock, EntityId, EntityRef, ErrorKind, Stamp, Value};
use trellis_storage::{CollectionSchema, Database, Dependency, FieldSchema, IndexSpec};

fn database() -> Database {
    let users = CollectionSchema::new("Users")
        .with_field(FieldSchema::new("name", ""))
        .with_index(IndexSpec::unique("=email").unwrap());
    let tags = CollectionSchema::new("Tags").strict().with_field(FieldSchema::optional("label"));
    Database::new(vec![users, tags]).unwrap()
}

fn fields(pairs: &[(&str, Value)]) -> Vec<(Arc<str>, Value)> {
    pairs.iter().map(|(k, v)| (Arc::from(*k), v.clone())).collect()
}

// =============================================================================
// Membership
// =============================================================================

#[test]
fn add_fills_defaults_and_keeps_order() {
    let clock = Clock::new();
    let mut db = database();
    let mut touched = Vec::new();
    let (b, _) = db
        .add("Users", Some(EntityId::new("b")), Vec::new(), clock.tick(), &mut touched)
        .unwrap();
    let (a, _) = db
        .add("Users", Some(EntityId::new("a")), fields(&[("name", "Ann".into())]), clock.tick(), &mut touched)
        .unwrap();

    assert_eq!(db.record(&b).unwrap().value("name"), Value::from(""));
    assert_eq!(db.record(&a).unwrap().value("name"), Value::from("Ann"));
    assert_eq!(db.record(&a).unwrap().value("id"), Value::from("a"));
    let members: Vec<EntityRef> = db.collection("Users").unwrap().members().collect();
    assert_eq!(members, vec![b, a]);
    assert!(touched.contains(&Dependency::Members("Users".into())));
}

#[test]
fn generated_ids_skip_taken_ones() {
    let clock = Clock::new();
    let mut db = database();
    let mut touched = Vec::new();
    let taken = EntityId::generated(2);
    db.add("Users", Some(taken.clone()), Vec::new(), clock.tick(), &mut touched)
        .unwrap();
    let (generated, _) = db.add("Users", None, Vec::new(), clock.tick(), &mut touched).unwrap();
    assert_ne!(generated.id, taken);
    assert_eq!(db.collection("Users").unwrap().len(), 2);
}

#[test]
fn removed_ids_stay_reserved() {
    let clock = Clock::new();
    let mut db = database();
    let mut touched = Vec::new();
    let (u1, _) = db
        .add("Users", Some(EntityId::new("u1")), Vec::new(), clock.tick(), &mut touched)
        .unwrap();
    assert!(db.remove(&u1, clock.tick(), &mut touched).unwrap().is_some());
    assert!(db.remove(&u1, clock.tick(), &mut touched).unwrap().is_none());

    assert!(!db.is_live(&u1));
    let err = db.record(&u1).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InertEntity(_)));
    let err = db
        .add("Users", Some(EntityId::new("u1")), Vec::new(), clock.tick(), &mut touched)
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UniqueConstraintViolation { .. }));

    let ghost = EntityRef::new("Users", "ghost");
    assert!(matches!(db.record(&ghost).unwrap_err().kind, ErrorKind::UnknownEntity(_)));
    assert!(matches!(
        db.collection("Nope").unwrap_err().kind,
        ErrorKind::UnknownCollection(_)
    ));
}

// =============================================================================
// Writes
// =============================================================================

#[test]
fn no_op_writes_touch_nothing() {
    let clock = Clock::new();
    let mut db = database();
    let mut touched = Vec::new();
    let (u1, _) = db
        .add("Users", Some(EntityId::new("u1")), fields(&[("name", "Ann".into())]), clock.tick(), &mut touched)
        .unwrap();
    let key = Dependency::field(&u1, "name");
    let before = db.stamp_of(&key);

    touched.clear();
    let result = db.write(&u1, "name", Value::from("Ann"), clock.tick(), &mut touched).unwrap();
    assert_eq!(result, None);
    assert!(touched.is_empty());
    assert_eq!(db.stamp_of(&key), before);

    let result = db.write(&u1, "name", Value::from("Bea"), clock.tick(), &mut touched).unwrap();
    assert_eq!(result, Some(Some(Value::from("Ann"))));
    assert!(touched.contains(&key));
    assert!(touched.contains(&Dependency::Entity(u1.clone())));
    assert!(db.stamp_of(&key) > before);
}

#[test]
fn new_fields_change_the_shape() {
    let clock = Clock::new();
    let mut db = database();
    let mut touched = Vec::new();
    let (u1, _) = db
        .add("Users", Some(EntityId::new("u1")), Vec::new(), clock.tick(), &mut touched)
        .unwrap();
    let shape = Dependency::Shape(u1.clone());

    touched.clear();
    db.write(&u1, "nickname", Value::from("A"), clock.tick(), &mut touched).unwrap();
    assert!(touched.contains(&shape));

    touched.clear();
    assert_eq!(
        db.delete(&u1, "nickname", clock.tick(), &mut touched).unwrap(),
        Some(Value::from("A"))
    );
    assert!(touched.contains(&shape));
    assert_eq!(db.delete(&u1, "nickname", clock.tick(), &mut touched).unwrap(), None);
}

#[test]
fn strict_collections_and_ids_reject_writes() {
    let clock = Clock::new();
    let mut db = database();
    let mut touched = Vec::new();
    let (t1, _) = db
        .add("Tags", Some(EntityId::new("t1")), Vec::new(), clock.tick(), &mut touched)
        .unwrap();
    let err = db.write(&t1, "colour", Value::from("red"), clock.tick(), &mut touched).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownMember { .. }));
    let err = db.write(&t1, "id", Value::from("t2"), clock.tick(), &mut touched).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IllegalMutation(_)));
    assert_eq!(db.record(&t1).unwrap().value("label"), Value::Nil);
}

#[test]
fn unique_indexes_reject_collisions() {
    let clock = Clock::new();
    let mut db = database();
    let mut touched = Vec::new();
    db.add("Users", Some(EntityId::new("u1")), fields(&[("email", "a@x".into())]), clock.tick(), &mut touched)
        .unwrap();
    let (u2, _) = db
        .add("Users", Some(EntityId::new("u2")), fields(&[("email", "b@x".into())]), clock.tick(), &mut touched)
        .unwrap();

    let err = db
        .add("Users", Some(EntityId::new("u3")), fields(&[("email", "a@x".into())]), clock.tick(), &mut touched)
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UniqueConstraintViolation { .. }));
    let err = db
        .write(&u2, "email", Value::from("a@x"), clock.tick(), &mut touched)
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UniqueConstraintViolation { .. }));
    assert_eq!(db.record(&u2).unwrap().value("email"), Value::from("b@x"));
}

#[test]
fn clones_are_independent_snapshots() {
    let clock = Clock::new();
    let mut db = database();
    let mut touched = Vec::new();
    let (u1, _) = db
        .add("Users", Some(EntityId::new("u1")), Vec::new(), clock.tick(), &mut touched)
        .unwrap();
    let snapshot = db.clone();
    db.write(&u1, "name", Value::from("Ann"), clock.tick(), &mut touched).unwrap();
    db.remove(&u1, clock.tick(), &mut touched).unwrap();

    assert!(snapshot.is_live(&u1));
    assert_eq!(snapshot.record(&u1).unwrap().value("name"), Value::from(""));
    assert_eq!(snapshot.stamp_of(&Dependency::Selector(trellis_storage::UnitId(0))), Stamp::ZERO);
}
