//! Integration tests for reactions
//!
//! Tests first runs, re-runs driven by reads, scheduling order, cycles, the
//! kill switch, and service reactions.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use trellis_engine::{Draft, EntityModel, ServiceModel, Store, StoreConfig};
use trellis_foundation::{EntityRef, ErrorKind, Value};
use trellis_storage::{BelongsTo, HasMany};

fn store_with(model: EntityModel) -> Store {
    Store::new(StoreConfig::new().with_collection(model)).unwrap()
}

#[test]
fn entity_reactions_run_in_the_adding_action() {
    let store = store_with(EntityModel::new("Users").with_reaction("greet", |s, e| {
        let name = s.get(e, "name")?;
        s.set(e, "greeting", format!("hi {name}"))
    }));
    let u1 = store
        .action(|s| s.add("Users", Draft::new().with("name", "Ann")))
        .unwrap();
    assert_eq!(store.get(&u1, "greeting").unwrap(), Value::from("hi Ann"));

    store.action(|s| s.set(&u1, "name", "Bea")).unwrap();
    assert_eq!(store.get(&u1, "greeting").unwrap(), Value::from("hi Bea"));

    // A reaction is not an assignable member
    let err = store.action(|s| s.set(&u1, "greet", 1)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IllegalMutation(_)));
}

#[test]
fn reactions_follow_relationship_reads() {
    let users = EntityModel::new("Users")
        .with_has_many(HasMany::new("jobs", "Jobs", "user_id"))
        .with_reaction("count", |s, e| {
            let jobs = s.get(e, "jobs")?;
            let count = jobs.as_list().map_or(0, |l| l.len());
            s.set(e, "job_count", i64::try_from(count).unwrap_or(i64::MAX))
        });
    let jobs = EntityModel::new("Jobs").with_belongs_to(BelongsTo::new("user", "Users", "user_id"));
    let store = Store::new(StoreConfig::new().with_collection(users).with_collection(jobs)).unwrap();

    let u1 = store.action(|s| s.add("Users", Draft::new().with_id("u1"))).unwrap();
    assert_eq!(store.get(&u1, "job_count").unwrap(), Value::Int(0));

    let j1 = store
        .action(|s| s.add("Jobs", Draft::new().with("user_id", "u1")))
        .unwrap();
    store
        .action(|s| s.add("Jobs", Draft::new().with("user", Value::Ref(u1.clone()))))
        .unwrap();
    assert_eq!(store.get(&u1, "job_count").unwrap(), Value::Int(2));

    store.action(|s| s.remove(&j1)).unwrap();
    assert_eq!(store.get(&u1, "job_count").unwrap(), Value::Int(1));
}

#[test]
fn sort_changes_that_keep_the_order_do_not_rerun_readers() {
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    let users = EntityModel::new("Users")
        .with_has_many(HasMany::new("jobs", "Jobs", "user_id").with_sort("-num"))
        .with_reaction("list", move |s, e| {
            s.get(e, "jobs")?;
            counter.set(counter.get() + 1);
            Ok(())
        });
    let jobs = EntityModel::new("Jobs").with_belongs_to(BelongsTo::new("user", "Users", "user_id"));
    let store = Store::new(StoreConfig::new().with_collection(users).with_collection(jobs)).unwrap();

    store.action(|s| s.add("Users", Draft::new().with_id("u1"))).unwrap();
    let j1 = store
        .action(|s| s.add("Jobs", Draft::new().with("user_id", "u1").with("num", 1)))
        .unwrap();
    let settled = runs.get();

    store.action(|s| s.set(&j1, "num", 2)).unwrap();
    assert_eq!(runs.get(), settled);

    store
        .action(|s| s.add("Jobs", Draft::new().with("user_id", "u1").with("num", 5)))
        .unwrap();
    assert_eq!(runs.get(), settled + 1);
}

#[test]
fn reactions_run_in_registration_order() {
    let store = store_with(EntityModel::new("Flags"));
    let flag = store.action(|s| s.add("Flags", Draft::new().with("on", false))).unwrap();
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::default();

    for name in ["first", "second", "third"] {
        let log = order.clone();
        let target = flag.clone();
        store
            .reaction(name, move |s| {
                s.get(&target, "on")?;
                log.borrow_mut().push(name);
                Ok(())
            })
            .unwrap();
    }
    order.borrow_mut().clear();

    store.action(|s| s.set(&flag, "on", true)).unwrap();
    assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
}

#[test]
fn a_reaction_writing_what_it_reads_is_a_cycle() {
    let store = store_with(EntityModel::new("Counters"));
    let c = store.action(|s| s.add("Counters", Draft::new().with("n", 0))).unwrap();

    let target = c.clone();
    let err = store
        .reaction("bump", move |s| {
            let n = s.get(&target, "n")?.as_int().unwrap_or_default();
            s.set(&target, "n", n + 1)
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Circular dependency detected while executing these reactions: bump"
    );
    assert_eq!(store.get(&c, "n").unwrap(), Value::Int(0));

    // The failed reaction was never registered
    store.action(|s| s.set(&c, "n", 5)).unwrap();
    assert_eq!(store.get(&c, "n").unwrap(), Value::Int(5));
}

#[test]
fn kill_switch_names_the_reaction() {
    let store = Store::new(
        StoreConfig::new()
            .with_collection(EntityModel::new("Users").with_reaction("touch", |s, e| s.get(e, "id").map(|_| ())))
            .with_max_reaction_runs(2),
    )
    .unwrap();

    let err = store
        .action(|s| {
            for id in ["u1", "u2", "u3"] {
                s.add("Users", Draft::new().with_id(id))?;
            }
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::LimitExceeded(_)));
    assert_eq!(
        err.to_string(),
        "limit exceeded: max reaction runs (2) exceeded at Users#u3.touch"
    );
    assert_eq!(store.len("Users").unwrap(), 0);

    // Each action gets a fresh budget
    store.action(|s| s.add("Users", Draft::new().with_id("u1"))).unwrap();
    store.action(|s| s.add("Users", Draft::new().with_id("u2"))).unwrap();
    store.action(|s| s.add("Users", Draft::new().with_id("u3"))).unwrap();
    assert_eq!(store.len("Users").unwrap(), 3);
}

#[test]
fn removing_an_entity_disposes_its_reactions() {
    let runs = Rc::new(Cell::new(0));
    let seen = runs.clone();
    let store = store_with(EntityModel::new("Users").with_reaction("watch", move |s, e| {
        s.get(e, "name")?;
        seen.set(seen.get() + 1);
        Ok(())
    }));
    let u1 = store.action(|s| s.add("Users", Draft::new().with("name", "Ann"))).unwrap();
    assert_eq!(runs.get(), 1);

    store
        .action(|s| {
            s.set(&u1, "name", "Bea")?;
            s.remove(&u1)
        })
        .unwrap();
    assert_eq!(runs.get(), 1);
}

#[test]
fn service_reactions_start_with_the_store() {
    let runs = Rc::new(Cell::new(0));
    let seen = runs.clone();
    let stats = ServiceModel::new("Stats").with_reaction("tally", move |s| {
        s.len("Users")?;
        seen.set(seen.get() + 1);
        Ok(())
    });
    let store = Store::new(
        StoreConfig::new()
            .with_collection(EntityModel::new("Users"))
            .with_service(stats),
    )
    .unwrap();
    assert_eq!(runs.get(), 1);

    let u1: EntityRef = store.action(|s| s.add("Users", Draft::new())).unwrap();
    assert_eq!(runs.get(), 2);
    store.action(|s| s.set(&u1, "name", "Ann")).unwrap();
    assert_eq!(runs.get(), 2);

    // Service reactions survive a reset
    store.clear_state().unwrap();
    store.action(|s| s.add("Users", Draft::new())).unwrap();
    assert_eq!(runs.get(), 3);
}
