//! Integration tests for relationships
//!
//! Tests that both sides of a relationship always agree with the foreign
//! keys, under reassignment, re-sorting, and arbitrary edit sequences.

use proptest::prelude::*;
use trellis_engine::{Draft, EntityModel, Store, StoreConfig};
use trellis_foundation::{EntityRef, Value};
use trellis_storage::{BelongsTo, HasMany, IndexSpec};

fn ids(value: &Value) -> Vec<String> {
    value.refs().iter().map(|e| e.id.to_string()).collect()
}

fn store(users: EntityModel, jobs: EntityModel) -> Store {
    Store::new(StoreConfig::new().with_collection(users).with_collection(jobs)).unwrap()
}

#[test]
fn assigning_and_clearing_a_has_many() {
    let store = store(
        EntityModel::new("Users").with_has_many(HasMany::new("jobs", "Jobs", "user_id")),
        EntityModel::new("Jobs").with_belongs_to(BelongsTo::new("user", "Users", "user_id")),
    );
    let user = store.action(|s| s.add("Users", Draft::new().with_id("user#1"))).unwrap();
    let job = store
        .action(|s| s.add("Jobs", Draft::new().with_id("job").with("user_id", Value::Nil)))
        .unwrap();

    let list: Value = [Value::Ref(job.clone())].into_iter().collect();
    store.action(|s| s.set(&user, "jobs", list)).unwrap();
    assert_eq!(store.get(&job, "user_id").unwrap(), Value::from("user#1"));
    assert_eq!(ids(&store.get(&user, "jobs").unwrap()), ["job"]);
    assert_eq!(store.get(&job, "user").unwrap(), Value::Ref(user.clone()));

    store
        .action(|s| s.set(&user, "jobs", Value::List(Default::default())))
        .unwrap();
    assert_eq!(store.get(&job, "user_id").unwrap(), Value::Nil);
    assert!(ids(&store.get(&user, "jobs").unwrap()).is_empty());
    assert_eq!(store.get(&job, "user").unwrap(), Value::Nil);
}

#[test]
fn prefix_indexes_are_re_sorted_on_read() {
    let store = store(
        EntityModel::new("Users").with_has_many(HasMany::new("jobs", "Jobs", "user_id").with_sort("-num")),
        EntityModel::new("Jobs").with_index(IndexSpec::parse("=user_id").unwrap()),
    );
    let (u1, j1) = store
        .action(|s| {
            let u1 = s.add("Users", Draft::new().with_id("u1"))?;
            let j1 = s.add("Jobs", Draft::new().with_id("j1").with("user_id", "u1").with("num", 1))?;
            s.add("Jobs", Draft::new().with_id("j2").with("user_id", "u1").with("num", 2))?;
            Ok((u1, j1))
        })
        .unwrap();

    let first = store.get(&u1, "jobs").unwrap();
    assert_eq!(ids(&first), ["j2", "j1"]);
    assert!(first.same(&store.get(&u1, "jobs").unwrap()));

    store.action(|s| s.set(&j1, "num", 3)).unwrap();
    let second = store.get(&u1, "jobs").unwrap();
    assert_eq!(ids(&second), ["j1", "j2"]);
    assert!(!first.same(&second));

    // The declared index still serves lookups directly
    let bucket = store.lookup("Jobs", "=user_id", &[Value::from("u1")]).unwrap();
    assert_eq!(bucket.len(), 2);
    assert_eq!(store.index_keys("Jobs", "=user_id", &[]).unwrap(), vec![Value::from("u1")]);
}

#[test]
fn owners_found_through_a_non_id_key() {
    let store = store(
        EntityModel::new("Teams").with_has_many(HasMany::new("players", "Players", "team_code").with_primary_key("code")),
        EntityModel::new("Players")
            .with_belongs_to(BelongsTo::new("team", "Teams", "team_code").with_primary_key("code")),
    );
    let (red, p1) = store
        .action(|s| {
            let red = s.add("Teams", Draft::new().with("code", "RED"))?;
            let p1 = s.add("Players", Draft::new().with("team_code", "RED"))?;
            Ok((red, p1))
        })
        .unwrap();
    assert_eq!(store.get(&p1, "team").unwrap(), Value::Ref(red.clone()));
    assert_eq!(store.get(&red, "players").unwrap().refs(), vec![p1.clone()]);

    // Renaming the owner's key orphans its children
    store.action(|s| s.set(&red, "code", "BLUE")).unwrap();
    assert_eq!(store.get(&p1, "team").unwrap(), Value::Nil);
    assert!(store.get(&red, "players").unwrap().refs().is_empty());
}

// =============================================================================
// Consistency Under Arbitrary Edits
// =============================================================================

const USERS: usize = 3;
const JOBS: usize = 6;

#[derive(Clone, Debug)]
enum Edit {
    WriteKey { job: usize, user: Option<usize> },
    AssignOwner { job: usize, user: Option<usize> },
    Push { user: usize, job: usize },
    Pop { user: usize },
    Renumber { job: usize, num: i64 },
    Remove { job: usize },
}

fn edit() -> impl Strategy<Value = Edit> {
    let user = proptest::option::of(0..USERS);
    prop_oneof![
        (0..JOBS, user.clone()).prop_map(|(job, user)| Edit::WriteKey { job, user }),
        (0..JOBS, user).prop_map(|(job, user)| Edit::AssignOwner { job, user }),
        (0..USERS, 0..JOBS).prop_map(|(user, job)| Edit::Push { user, job }),
        (0..USERS).prop_map(|user| Edit::Pop { user }),
        (0..JOBS, 0i64..3).prop_map(|(job, num)| Edit::Renumber { job, num }),
        (0..JOBS).prop_map(|job| Edit::Remove { job }),
    ]
}

fn apply(store: &Store, users: &[EntityRef], jobs: &[EntityRef], edit: &Edit) {
    if let Edit::Pop { user } = edit {
        store.action(|s| s.pop_related(&users[*user], "jobs")).unwrap();
        return;
    }
    let job = match edit {
        Edit::WriteKey { job, .. }
        | Edit::AssignOwner { job, .. }
        | Edit::Push { job, .. }
        | Edit::Renumber { job, .. }
        | Edit::Remove { job } => &jobs[*job],
        Edit::Pop { .. } => return,
    };
    if !store.contains(job) {
        return;
    }
    store
        .action(|s| match edit {
            Edit::WriteKey { user, .. } => {
                let key = user.map_or(Value::Nil, |u| Value::from(users[u].id.as_str()));
                s.set(job, "user_id", key)
            }
            Edit::AssignOwner { user, .. } => {
                let owner = user.map_or(Value::Nil, |u| Value::Ref(users[u].clone()));
                s.set(job, "user", owner)
            }
            Edit::Push { user, .. } => s.push_related(&users[*user], "jobs", job),
            Edit::Renumber { num, .. } => s.set(job, "num", *num),
            Edit::Remove { .. } => s.remove(job),
            Edit::Pop { .. } => Ok(()),
        })
        .unwrap();
}

/// Children of `user` recomputed from the foreign keys: `-num`, then id.
fn expected(store: &Store, user: &EntityRef) -> Vec<String> {
    let mut rows: Vec<(i64, String)> = store
        .all("Jobs")
        .unwrap()
        .iter()
        .filter(|job| store.get(job, "user_id").unwrap() == Value::from(user.id.as_str()))
        .map(|job| {
            let num = store.get(job, "num").unwrap().as_int().unwrap_or_default();
            (num, job.id.to_string())
        })
        .collect();
    rows.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    rows.into_iter().map(|(_, id)| id).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn both_sides_agree_with_the_foreign_keys(
        exact in any::<bool>(),
        edits in proptest::collection::vec(edit(), 0..40),
    ) {
        let mut jobs_model = EntityModel::new("Jobs")
            .with_belongs_to(BelongsTo::new("user", "Users", "user_id"));
        if !exact {
            jobs_model = jobs_model.with_index(IndexSpec::parse("=user_id").unwrap());
        }
        let store = store(
            EntityModel::new("Users").with_has_many(HasMany::new("jobs", "Jobs", "user_id").with_sort("-num")),
            jobs_model,
        );
        let (users, jobs) = store
            .action(|s| {
                let users = (0..USERS)
                    .map(|i| s.add("Users", Draft::new().with_id(format!("u{i}"))))
                    .collect::<trellis_foundation::Result<Vec<_>>>()?;
                let jobs = (0..JOBS)
                    .map(|i| s.add("Jobs", Draft::new().with_id(format!("j{i}")).with("num", 0)))
                    .collect::<trellis_foundation::Result<Vec<_>>>()?;
                Ok((users, jobs))
            })
            .unwrap();

        for edit in &edits {
            apply(&store, &users, &jobs, edit);
        }

        for user in &users {
            prop_assert_eq!(ids(&store.get(user, "jobs").unwrap()), expected(&store, user));
        }
        for job in jobs.iter().filter(|j| store.contains(j)) {
            let fk = store.get(job, "user_id").unwrap();
            let owner = store.get(job, "user").unwrap();
            match fk.as_str() {
                Some(id) => prop_assert_eq!(owner, Value::Ref(EntityRef::new("Users", id))),
                None => prop_assert_eq!(owner, Value::Nil),
            }
        }
    }
}
