//! Integration tests for actions and change hooks
//!
//! Tests rollback, no-op suppression, hook ordering, change summaries, and
//! the mutation rules enforced by the store.

use std::cell::RefCell;
use std::rc::Rc;

use trellis_engine::{ChangeSummary, Draft, EntityModel, Store, StoreConfig};
use trellis_foundation::{EntityRef, Error, ErrorKind, Value};
use trellis_storage::{Descriptor, FieldSchema, IndexSpec};

type Log = Rc<RefCell<Vec<String>>>;

fn users(log: &Log) -> EntityModel {
    let props = log.clone();
    let changes = log.clone();
    EntityModel::new("Users")
        .with_field(FieldSchema::new("name", ""))
        .with_field(FieldSchema::new("age", 0))
        .with_index(IndexSpec::unique("=email").unwrap())
        .after_property_change(move |_, entity, name, old| {
            props.borrow_mut().push(format!("{entity}.{name} was {old}"));
            Ok(())
        })
        .after_change(move |_, entity| {
            changes.borrow_mut().push(format!("{entity} changed"));
            Ok(())
        })
}

fn setup() -> (Store, EntityRef, Log, Rc<RefCell<Vec<ChangeSummary>>>) {
    let log: Log = Rc::default();
    let summaries: Rc<RefCell<Vec<ChangeSummary>>> = Rc::default();
    let sink = summaries.clone();
    let store = Store::new(
        StoreConfig::new()
            .with_collection(users(&log))
            .with_listener(move |summary| sink.borrow_mut().push(summary.clone())),
    )
    .unwrap();
    let u1 = store
        .action(|s| s.add("Users", Draft::new().with_id("u1").with("name", "Ann").with("age", 30)))
        .unwrap();
    (store, u1, log, summaries)
}

// =============================================================================
// Hooks
// =============================================================================

#[test]
fn adding_does_not_fire_change_hooks() {
    let (_, _, log, summaries) = setup();
    assert!(log.borrow().is_empty());
    assert_eq!(summaries.borrow().len(), 1);
    assert_eq!(summaries.borrow()[0].added, vec![EntityRef::new("Users", "u1")]);
}

#[test]
fn after_change_fires_once_after_property_hooks() {
    let (store, u1, log, _) = setup();
    store
        .action(|s| {
            s.set(&u1, "name", "Bea")?;
            s.set(&u1, "age", 31)?;
            s.set(&u1, "name", "Cat")
        })
        .unwrap();

    assert_eq!(
        *log.borrow(),
        vec![
            "Users#u1.name was Ann".to_string(),
            "Users#u1.age was 30".to_string(),
            "Users#u1 changed".to_string(),
        ]
    );
}

#[test]
fn no_op_writes_fire_nothing() {
    let (store, u1, log, summaries) = setup();
    store
        .action(|s| {
            s.set(&u1, "name", "Ann")?;
            s.set(&u1, "age", 30)
        })
        .unwrap();

    assert!(log.borrow().is_empty());
    let summaries = summaries.borrow();
    assert_eq!(summaries.len(), 2);
    assert!(summaries[1].is_empty());
}

#[test]
fn hook_writes_do_not_repeat_after_change() {
    let model = EntityModel::new("Counters")
        .with_field(FieldSchema::new("edits", 0))
        .after_change(|s, entity| {
            let edits = s.get(entity, "edits")?.as_int().unwrap_or_default();
            s.set(entity, "edits", edits + 1)
        });
    let store = Store::new(StoreConfig::new().with_collection(model)).unwrap();
    let c = store.action(|s| s.add("Counters", Draft::new())).unwrap();

    store.action(|s| s.set(&c, "label", "a")).unwrap();
    assert_eq!(store.get(&c, "edits").unwrap(), Value::Int(1));
    store.action(|s| s.set(&c, "label", "b")).unwrap();
    assert_eq!(store.get(&c, "edits").unwrap(), Value::Int(2));
}

// =============================================================================
// Rollback
// =============================================================================

#[test]
fn failed_bodies_roll_back_everything() {
    let (store, u1, log, summaries) = setup();
    let err = store
        .action(|s| {
            s.set(&u1, "name", "Zed")?;
            s.add("Users", Draft::new().with_id("u2"))?;
            s.remove(&u1)?;
            Err::<(), _>(Error::rejected("changed my mind"))
        })
        .unwrap_err();

    assert!(matches!(err.kind, ErrorKind::Rejected(_)));
    assert_eq!(err.context.as_ref().and_then(|c| c.action), Some(2));
    assert!(store.contains(&u1));
    assert_eq!(store.get(&u1, "name").unwrap(), Value::from("Ann"));
    assert_eq!(store.find("Users", "u2").unwrap(), None);
    assert!(log.borrow().is_empty());
    assert_eq!(summaries.borrow().len(), 1);
    assert!(!store.in_action());
}

#[test]
fn failing_hooks_roll_back_the_action() {
    let model = EntityModel::new("Users").after_change(|s, entity| {
        if s.get(entity, "name")? == Value::from("bad") {
            return Err(Error::rejected("bad name"));
        }
        Ok(())
    });
    let store = Store::new(StoreConfig::new().with_collection(model)).unwrap();
    let u1 = store
        .action(|s| s.add("Users", Draft::new().with("name", "good")))
        .unwrap();

    let err = store.action(|s| s.set(&u1, "name", "bad")).unwrap_err();
    let stack = err.context.map(|c| c.stack).unwrap_or_default();
    assert_eq!(stack, vec![format!("{u1}.afterChange")]);
    assert_eq!(store.get(&u1, "name").unwrap(), Value::from("good"));
}

#[test]
fn unique_violations_fail_the_action() {
    let (store, u1, _, _) = setup();
    store.action(|s| s.set(&u1, "email", "ann@example.com")).unwrap();

    let err = store
        .action(|s| s.add("Users", Draft::new().with_id("u2").with("email", "ann@example.com")))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UniqueConstraintViolation { .. }));
    assert!(err.to_string().contains("ann@example.com"));
    assert_eq!(store.len("Users").unwrap(), 1);
    assert_eq!(
        store
            .lookup("Users", "unique =email", &[Value::from("ann@example.com")])
            .unwrap()
            .len(),
        1
    );
}

// =============================================================================
// Mutation Rules
// =============================================================================

#[test]
fn mutations_require_an_action() {
    let (store, u1, _, _) = setup();
    for err in [
        store.set(&u1, "name", "Bea").unwrap_err(),
        store.add("Users", Draft::new()).map(|_| ()).unwrap_err(),
        store.remove(&u1).unwrap_err(),
        store.delete(&u1, "age").map(|_| ()).unwrap_err(),
    ] {
        assert!(matches!(err.kind, ErrorKind::IllegalMutation(_)), "{err}");
    }
}

#[test]
fn structural_changes_are_rejected() {
    let (store, u1, _, _) = setup();
    let descriptor = Descriptor {
        value: Some(Value::Int(1)),
        writable: true,
        enumerable: true,
    };
    let err = store.define_property(&u1, "age", descriptor).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IllegalMutation(_)));
    let err = store.retype(&u1, "Admins").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IllegalMutation(_)));
    let err = store.action(|s| s.set(&u1, "id", "u9")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IllegalMutation(_)));
}

#[test]
fn ad_hoc_fields_are_tracked_like_declared_ones() {
    let (store, u1, log, _) = setup();
    assert!(!store.has(&u1, "nickname").unwrap());
    store.action(|s| s.set(&u1, "nickname", "A")).unwrap();
    assert!(store.has(&u1, "nickname").unwrap());
    assert!(store.keys(&u1).unwrap().iter().any(|k| &**k == "nickname"));
    assert_eq!(
        store.descriptor(&u1, "nickname").unwrap().and_then(|d| d.value),
        Some(Value::from("A"))
    );

    assert!(store.action(|s| s.delete(&u1, "nickname")).unwrap());
    assert!(!store.action(|s| s.delete(&u1, "nickname")).unwrap());
    assert_eq!(store.get(&u1, "nickname").unwrap(), Value::Nil);
    assert!(log.borrow().contains(&"Users#u1.nickname was A".to_string()));
}

#[test]
fn strict_collections_reject_undeclared_members() {
    let tags = EntityModel::new("Tags").strict().with_field(FieldSchema::optional("label"));
    let store = Store::new(StoreConfig::new().with_collection(tags)).unwrap();
    let t1 = store.action(|s| s.add("Tags", Draft::new())).unwrap();

    let err = store.action(|s| s.set(&t1, "colour", "red")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownMember { .. }));
    let err = store.get(&t1, "colour").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownMember { .. }));
    let err = store
        .action(|s| s.add("Tags", Draft::new().with("colour", "red")))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownMember { .. }));
    assert_eq!(store.get(&t1, "label").unwrap(), Value::Nil);
}

#[test]
fn removed_entities_are_inert() {
    let (store, u1, _, _) = setup();
    let before = store.current_entity(&u1).unwrap().unwrap();
    assert!(before.same(&store.current_entity(&u1).unwrap().unwrap()));

    store.action(|s| s.set(&u1, "age", 31)).unwrap();
    let after = store.current_entity(&u1).unwrap().unwrap();
    assert!(!before.same(&after));
    assert!(after.revision() > before.revision());

    store.action(|s| s.remove(&u1)).unwrap();
    assert_eq!(store.current_entity(&u1).unwrap(), None);
    assert!(matches!(store.get(&u1, "name").unwrap_err().kind, ErrorKind::InertEntity(_)));
    let err = store.action(|s| s.set(&u1, "name", "ghost")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InertEntity(_)));
    // Removing twice is harmless
    store.action(|s| s.remove(&u1)).unwrap();
}

// =============================================================================
// Summaries and State
// =============================================================================

#[test]
fn summaries_describe_committed_actions() {
    let (store, u1, _, summaries) = setup();
    store
        .named_action("shuffle", |s| {
            s.set(&u1, "name", "Bea")?;
            let fleeting = s.add("Users", Draft::new().with_id("u2"))?;
            s.remove(&fleeting)?;
            s.add("Users", Draft::new().with_id("u3"))?;
            Ok(())
        })
        .unwrap();

    let summaries = summaries.borrow();
    let last = summaries.last().unwrap();
    assert_eq!(last.action, 2);
    assert_eq!(last.name.as_deref(), Some("shuffle"));
    assert_eq!(last.added, vec![EntityRef::new("Users", "u3")]);
    assert!(last.removed.is_empty());
    assert_eq!(last.changes_of(&u1), Some(&["name".to_string()][..]));
}

#[test]
fn nested_actions_join_the_outer_one() {
    let (store, u1, _, summaries) = setup();
    store
        .action(|s| {
            assert!(s.in_action());
            s.action(|inner| inner.set(&u1, "name", "Bea"))?;
            s.set(&u1, "age", 40)
        })
        .unwrap();
    assert_eq!(summaries.borrow().len(), 2);
    assert_eq!(
        summaries.borrow()[1].changes_of(&u1),
        Some(&["age".to_string(), "name".to_string()][..])
    );
}

#[test]
fn clear_state_returns_to_the_initial_store() {
    let (store, u1, _, summaries) = setup();
    store.action(|s| s.add("Users", Draft::new().with_id("u2"))).unwrap();

    let err = store.action(|s| s.clear_state()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IllegalMutation(_)));

    store.clear_state().unwrap();
    assert_eq!(store.len("Users").unwrap(), 0);
    assert!(!store.contains(&u1));
    assert_eq!(summaries.borrow().len(), 2);

    // Ids are free again
    store.action(|s| s.add("Users", Draft::new().with_id("u1"))).unwrap();
    assert_eq!(store.len("Users").unwrap(), 1);
}
