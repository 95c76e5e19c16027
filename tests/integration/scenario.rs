//! End-to-end scenario through the top-level crate
//!
//! Users own jobs; a selector totals them, a service reaction audits the
//! user count, a watch follows the total, and the change log records it all.

use std::cell::RefCell;
use std::rc::Rc;

use trellis::debug::ChangeLog;
use trellis::storage::{BelongsTo, HasMany};
use trellis::{Draft, EntityModel, EntityRef, ErrorKind, ServiceModel, Store, StoreConfig, Value};

fn count(n: usize) -> Value {
    Value::from(i64::try_from(n).unwrap())
}

fn total(store: &Store, user: &EntityRef) -> trellis::Result<Value> {
    let mut sum = 0;
    for job in store.get(user, "jobs")?.refs() {
        sum += store.get(&job, "num")?.as_int().unwrap_or(0);
    }
    Ok(Value::from(sum))
}

fn ids(value: &Value) -> Vec<String> {
    value.refs().iter().map(|e| e.id.to_string()).collect()
}

#[test]
fn users_and_jobs_end_to_end() {
    let audit: Rc<RefCell<Vec<Value>>> = Rc::default();
    let sink = audit.clone();
    let log = ChangeLog::new();

    let store = Store::new(
        StoreConfig::new()
            .with_collection(
                EntityModel::new("Users")
                    .with_has_many(HasMany::new("jobs", "Jobs", "user_id").with_sort("-num"))
                    .with_selector("total", total),
            )
            .with_collection(EntityModel::new("Jobs").with_belongs_to(BelongsTo::new("user", "Users", "user_id")))
            .with_service(
                ServiceModel::new("Stats")
                    .with_selector("headcount", |s| Ok(count(s.all("Users")?.len())))
                    .with_reaction("audit", move |s| {
                        let headcount = s.service_select("Stats", "headcount")?;
                        sink.borrow_mut().push(headcount);
                        Ok(())
                    }),
            )
            .with_listener(log.listener()),
    )
    .unwrap();
    assert_eq!(*audit.borrow(), vec![count(0)]);

    let (u1, j1) = store
        .named_action("seed", |s| {
            let u1 = s.add("Users", Draft::new().with_id("u1").with("name", "Ann"))?;
            let j1 = s.add("Jobs", Draft::new().with_id("j1").with("user_id", "u1").with("num", 1))?;
            s.add("Jobs", Draft::new().with_id("j2").with("user_id", "u1").with("num", 2))?;
            Ok((u1, j1))
        })
        .unwrap();
    assert_eq!(*audit.borrow(), vec![count(0), count(1)]);
    assert_eq!(ids(&store.get(&u1, "jobs").unwrap()), ["j2", "j1"]);
    assert_eq!(store.get(&u1, "total").unwrap(), Value::from(3));
    assert_eq!(store.get(&j1, "user").unwrap(), Value::Ref(u1.clone()));

    let totals: Rc<RefCell<Vec<Value>>> = Rc::default();
    let seen = totals.clone();
    let reader = u1.clone();
    store
        .watch(
            move |s| s.get(&reader, "total"),
            move |result| seen.borrow_mut().push(result.as_ref().ok().cloned().unwrap_or(Value::Nil)),
        )
        .unwrap();

    store.action(|s| s.set(&j1, "num", 5)).unwrap();
    assert_eq!(ids(&store.get(&u1, "jobs").unwrap()), ["j1", "j2"]);

    let popped = store.action(|s| s.pop_related(&u1, "jobs")).unwrap().unwrap();
    assert_eq!(popped.id.to_string(), "j2");
    assert_eq!(store.get(&popped, "user_id").unwrap(), Value::Nil);
    assert_eq!(*totals.borrow(), vec![Value::from(7), Value::from(5)]);

    store.action(|s| s.set(&u1, "name", "Bea")).unwrap();
    assert_eq!(totals.borrow().len(), 2);
    assert_eq!(audit.borrow().len(), 2);

    let err = store.action(|s| s.set(&u1, "total", 1));
    assert!(matches!(err.unwrap_err().kind, ErrorKind::IllegalMutation(_)));

    assert_eq!(
        log.lines(),
        vec![
            "#1 seed: +Jobs#j1 +Jobs#j2 +Users#u1".to_string(),
            "#2: ~Jobs#j1{num}".to_string(),
            "#3: ~Jobs#j2{user,user_id} ~Users#u1{jobs}".to_string(),
            "#4: ~Users#u1{name}".to_string(),
        ]
    );

    store.clear_state().unwrap();
    assert!(store.all("Users").unwrap().is_empty());
    assert!(store.find("Users", "u1").unwrap().is_none());
    store.action(|s| s.add("Users", Draft::new().with_id("u1"))).unwrap();
    assert_eq!(audit.borrow().last(), Some(&count(1)));
    assert_eq!(store.get(&u1, "total").unwrap(), Value::from(0));
}
