//! Change log integration tests
//!
//! Tests the one-line rendering of committed actions, with the log
//! installed as the store's transaction listener.

use trellis_debug::ChangeLog;
use trellis_engine::{Draft, EntityModel, Store, StoreConfig};
use trellis_foundation::{Error, Result, Value};
use trellis_storage::{BelongsTo, HasMany};

fn logged_store(log: &ChangeLog) -> Store {
    Store::new(
        StoreConfig::new()
            .with_collection(EntityModel::new("Users").with_has_many(HasMany::new("jobs", "Jobs", "user_id")))
            .with_collection(EntityModel::new("Jobs").with_belongs_to(BelongsTo::new("user", "Users", "user_id")))
            .with_listener(log.listener()),
    )
    .unwrap()
}

#[test]
fn committed_actions_are_logged_in_order() {
    let log = ChangeLog::new();
    let store = logged_store(&log);

    let (_, j1) = store
        .named_action("seed", |s| {
            let u1 = s.add("Users", Draft::new().with_id("u1"))?;
            let j1 = s.add("Jobs", Draft::new().with_id("j1").with("user_id", "u1"))?;
            Ok((u1, j1))
        })
        .unwrap();
    store.action(|s| s.set(&j1, "user_id", Value::Nil)).unwrap();
    store.named_action("cleanup", |s| s.remove(&j1)).unwrap();
    store.action(|_| Ok(())).unwrap();

    assert_eq!(
        log.lines(),
        vec![
            "#1 seed: +Jobs#j1 +Users#u1".to_string(),
            "#2: ~Jobs#j1{user,user_id} ~Users#u1{jobs}".to_string(),
            "#3 cleanup: -Jobs#j1".to_string(),
            "#4: (no changes)".to_string(),
        ]
    );
}

#[test]
fn failed_actions_are_not_logged() {
    let log = ChangeLog::new();
    let store = logged_store(&log);
    let failed: Result<()> = store.action(|s| {
        s.add("Users", Draft::new())?;
        Err(Error::rejected("nope"))
    });
    assert!(failed.is_err());
    assert!(log.lines().is_empty());

    store.action(|s| s.add("Users", Draft::new().with_id("u9"))).unwrap();
    assert_eq!(log.last().as_deref(), Some("#2: +Users#u9"));
}

#[test]
fn entities_added_and_removed_together_leave_no_trace() {
    let log = ChangeLog::new();
    let store = logged_store(&log);
    store
        .action(|s| {
            let u1 = s.add("Users", Draft::new().with_id("u1"))?;
            s.set(&u1, "name", "Ann")?;
            s.remove(&u1)
        })
        .unwrap();
    assert_eq!(log.last().as_deref(), Some("#1: (no changes)"));
}
