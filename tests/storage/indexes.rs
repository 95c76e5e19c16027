//! Integration tests for maintained indexes
//!
//! Checks bucket contents against a brute-force model after arbitrary
//! sequences of inserts, moves, and removals.

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use trellis_foundation::{Clock, EntityRef, LtVec, Value};
use trellis_storage::{Index, IndexSpec, Record};

fn record(clock: &Clock, id: &str, group: i64, rank: i64) -> Record {
    Record::new(
        [
            (Arc::<str>::from("id"), Value::from(id)),
            (Arc::<str>::from("group"), Value::Int(group)),
            (Arc::<str>::from("rank"), Value::Int(rank)),
        ],
        clock.tick(),
    )
}

fn ids(list: &LtVec<Value>) -> Vec<String> {
    list.iter()
        .filter_map(Value::as_entity)
        .map(|e| e.id.to_string())
        .collect()
}

#[derive(Clone, Debug)]
enum Op {
    Upsert { id: u8, group: i64, rank: i64 },
    Remove { id: u8 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..12, 0i64..3, -5i64..5).prop_map(|(id, group, rank)| Op::Upsert { id, group, rank }),
        (0u8..12).prop_map(|id| Op::Remove { id }),
    ]
}

/// Expected bucket order: rank descending, then id ascending.
fn expected(model: &BTreeMap<String, (i64, i64)>, group: i64) -> Vec<String> {
    let mut members: Vec<(&String, i64)> = model
        .iter()
        .filter(|(_, (g, _))| *g == group)
        .map(|(id, (_, rank))| (id, *rank))
        .collect();
    members.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    members.into_iter().map(|(id, _)| id.clone()).collect()
}

proptest! {
    #[test]
    fn buckets_match_a_brute_force_model(ops in proptest::collection::vec(op(), 0..60)) {
        let clock = Clock::new();
        let mut index = Index::new(IndexSpec::parse("=group, -rank").unwrap());
        let mut records: BTreeMap<String, Record> = BTreeMap::new();
        let mut model: BTreeMap<String, (i64, i64)> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Upsert { id, group, rank } => {
                    let id = format!("e{id:02}");
                    let entity = EntityRef::new("Items", id.as_str());
                    let new = record(&clock, &id, group, rank);
                    match records.get(&id) {
                        Some(old) => {
                            index.update(&entity, old, &new, clock.tick());
                        }
                        None => {
                            index.insert(&entity, &new, clock.tick());
                        }
                    }
                    records.insert(id.clone(), new);
                    model.insert(id, (group, rank));
                }
                Op::Remove { id } => {
                    let id = format!("e{id:02}");
                    if let Some(old) = records.remove(&id) {
                        let entity = EntityRef::new("Items", id.as_str());
                        prop_assert!(index.remove(&entity, &old, clock.tick()).is_some());
                        model.remove(&id);
                    }
                }
            }
        }

        for group in 0..3 {
            let want = expected(&model, group);
            let got = index.lookup(&[Value::Int(group)]).map(|l| ids(&l)).unwrap_or_default();
            prop_assert_eq!(got, want);
        }
        let groups: Vec<Value> = (0..3)
            .filter(|g| model.values().any(|(group, _)| group == g))
            .map(Value::Int)
            .collect();
        prop_assert_eq!(index.keys_at(&[]), groups);
        let total = index.lookup(&[]).map_or(0, |l| l.len());
        prop_assert_eq!(total, model.len());
    }
}

#[test]
fn stamps_only_move_for_touched_buckets() {
    let clock = Clock::new();
    let mut index = Index::new(IndexSpec::parse("=group").unwrap());
    let a = EntityRef::new("Items", "a");
    let b = EntityRef::new("Items", "b");
    let ra = record(&clock, "a", 1, 0);
    let rb = record(&clock, "b", 2, 0);
    index.insert(&a, &ra, clock.tick());
    index.insert(&b, &rb, clock.tick());

    let one = index.stamp_at(&[Value::Int(1)]);
    let root = index.stamp_at(&[]);

    // A rank change does not move an unsorted member
    let rb2 = record(&clock, "b", 2, 9);
    assert!(index.update(&b, &rb, &rb2, clock.tick()).is_empty());
    assert_eq!(index.stamp_at(&[]), root);

    let rb3 = record(&clock, "b", 3, 9);
    let touched = index.update(&b, &rb2, &rb3, clock.tick());
    assert_eq!(touched, vec![vec![Value::Int(2)], vec![Value::Int(3)]]);
    assert_eq!(index.stamp_at(&[Value::Int(1)]), one);
    assert!(index.stamp_at(&[]) > root);
}

#[test]
fn sort_changes_that_keep_the_position_leave_the_bucket_alone() {
    let clock = Clock::new();
    let mut index = Index::new(IndexSpec::parse("=group, -rank").unwrap());
    let a = EntityRef::new("Items", "a");
    let b = EntityRef::new("Items", "b");
    let ra = record(&clock, "a", 1, 10);
    let rb = record(&clock, "b", 1, 5);
    index.insert(&a, &ra, clock.tick());
    index.insert(&b, &rb, clock.tick());

    let path = [Value::Int(1)];
    let before = index.lookup(&path).unwrap();
    let stamp = index.stamp_at(&path);

    // b stays below a
    let rb2 = record(&clock, "b", 1, 7);
    assert!(index.update(&b, &rb, &rb2, clock.tick()).is_empty());
    let after = index.lookup(&path).unwrap();
    assert!(before.ptr_eq(&after));
    assert_eq!(index.stamp_at(&path), stamp);

    // The stored key moved on, so a later swap is still seen
    let rb3 = record(&clock, "b", 1, 11);
    assert_eq!(index.update(&b, &rb2, &rb3, clock.tick()), vec![path.to_vec()]);
    assert_eq!(ids(&index.lookup(&path).unwrap()), ["b", "a"]);
    assert!(index.stamp_at(&path) > stamp);

    // A lone member never moves
    let c = EntityRef::new("Items", "c");
    let rc = record(&clock, "c", 2, 0);
    index.insert(&c, &rc, clock.tick());
    let lone = index.lookup(&[Value::Int(2)]).unwrap();
    let rc2 = record(&clock, "c", 2, 40);
    assert!(index.update(&c, &rc, &rc2, clock.tick()).is_empty());
    assert!(lone.ptr_eq(&index.lookup(&[Value::Int(2)]).unwrap()));
}
