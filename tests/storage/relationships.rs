//! Integration tests for relationship resolution
//!
//! Tests index selection for `has_many`, index synthesis, and schema errors.

use trellis_foundation::ErrorKind;
use trellis_storage::{
    select_index, BelongsTo, CollectionSchema, Database, FieldSchema, HasMany, IndexSpec, SortLevel,
};

fn spec(text: &str) -> IndexSpec {
    IndexSpec::parse(text).unwrap()
}

// =============================================================================
// Index Selection
// =============================================================================

#[test]
fn longest_matching_prefix_wins() {
    let indexes = [spec("=user_id"), spec("=user_id, -num"), spec("=user_id, +num")];
    let sort = [SortLevel::desc("num"), SortLevel::asc("name")];
    assert_eq!(select_index(&indexes, "user_id", &sort), Some((1, 1)));
    assert_eq!(select_index(&indexes, "user_id", &[]), Some((0, 0)));
}

#[test]
fn ties_go_to_the_first_declared() {
    let indexes = [spec("=user_id, -num"), spec("=user_id, -num")];
    assert_eq!(select_index(&indexes, "user_id", &[SortLevel::desc("num")]), Some((0, 1)));
}

#[test]
fn unusable_indexes_are_skipped() {
    let indexes = [
        IndexSpec::unique("=user_id").unwrap(),
        spec("=user_id, =kind"),
        spec("=owner_id"),
        spec("=user_id, -num, +name"),
    ];
    assert_eq!(select_index(&indexes, "user_id", &[SortLevel::desc("num")]), None);
}

// =============================================================================
// Resolution
// =============================================================================

fn users() -> CollectionSchema {
    CollectionSchema::new("Users").with_has_many(HasMany::new("jobs", "Jobs", "user_id").with_sort("-num, name"))
}

#[test]
fn missing_indexes_are_synthesized() {
    let jobs = CollectionSchema::new("Jobs").with_belongs_to(BelongsTo::new("user", "Users", "user_id"));
    let db = Database::new(vec![users(), jobs]).unwrap();

    let resolved = db.relations().has_many("Users", "jobs").unwrap();
    assert!(resolved.synthesized);
    assert!(resolved.exact);
    let index = db.collection("Jobs").unwrap().index(resolved.index).unwrap();
    assert_eq!(index.spec().to_string(), "=user_id, -num, +name");

    let owner = db.relations().belongs_to("Jobs", "user").unwrap();
    assert_eq!(owner.index, None);
}

#[test]
fn declared_prefix_indexes_are_reused() {
    let jobs = CollectionSchema::new("Jobs").with_index(spec("=user_id, -num"));
    let db = Database::new(vec![users(), jobs]).unwrap();

    let resolved = db.relations().has_many("Users", "jobs").unwrap();
    assert!(!resolved.synthesized);
    assert!(!resolved.exact);
    assert_eq!(resolved.index, 0);
    assert_eq!(db.collection("Jobs").unwrap().indexes().len(), 1);
}

#[test]
fn non_id_primary_keys_get_an_owner_index() {
    let teams = CollectionSchema::new("Teams").with_field(FieldSchema::optional("code"));
    let players = CollectionSchema::new("Players")
        .with_belongs_to(BelongsTo::new("team", "Teams", "team_code").with_primary_key("code"));
    let db = Database::new(vec![teams, players]).unwrap();

    let resolved = db.relations().belongs_to("Players", "team").unwrap();
    let slot = resolved.index.unwrap();
    assert_eq!(
        db.collection("Teams").unwrap().index(slot).unwrap().spec().to_string(),
        "=code"
    );
}

#[test]
fn inconsistent_schemas_are_rejected() {
    let err = Database::new(vec![users()]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidSchema(_)));

    let strict_jobs = CollectionSchema::new("Jobs").strict();
    let err = Database::new(vec![users(), strict_jobs]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidSchema(_)));

    let err = Database::new(vec![CollectionSchema::new("Jobs"), CollectionSchema::new("Jobs")]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidSchema(_)));

    let clash = CollectionSchema::new("Users")
        .with_field(FieldSchema::optional("jobs"))
        .with_has_many(HasMany::new("jobs", "Jobs", "user_id"));
    let err = Database::new(vec![clash, CollectionSchema::new("Jobs")]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidSchema(_)));
}
