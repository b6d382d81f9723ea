//! Batched resolution of a factorizable predicate must give every outer row
//! exactly the inner rows a naive nested loop would.

use std::sync::Arc;

use batched_resolution::{
    batching::ResolutionTree,
    factorize::FactorizationCache,
    projection::{EntityDefinition, Projector, Row, ShapeRequest},
    resolver::{RelationDefinition, RelationResolver},
    source::{Grouping, InMemorySource},
    BatchError, BatchingConfig, NoopRuntime, TreeError,
};
use proptest::prelude::*;
use query_expr::{lit, tuple, Lambda, Record, Value};

#[derive(Debug, Clone)]
struct Case {
    /// `(k, k2)` per outer row.
    outers: Vec<(Value, Value)>,
    /// `(k, k2, v)` per inner row.
    inners: Vec<(Value, Value, Value)>,
    residual: u8,
    flipped: bool,
    shifted: bool,
    composite: bool,
    push_down: bool,
}

/// Small numbers, as ints and as floats, so that equal keys show up in both.
fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(Value::Null),
        4 => (0i64..4).prop_map(Value::Int),
        2 => (0i64..4).prop_map(|k| Value::Float(k as f64)),
        1 => Just(Value::Float(-0.0)),
        1 => Just(Value::Float(0.5)),
    ]
}

fn arb_case() -> impl Strategy<Value = Case> {
    (
        prop::collection::vec((arb_value(), arb_value()), 0..6),
        prop::collection::vec((arb_value(), arb_value(), arb_value()), 1..12),
        0u8..3,
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(outers, inners, residual, flipped, shifted, composite, push_down)| Case {
                outers,
                inners,
                residual,
                flipped,
                shifted,
                composite,
                push_down,
            },
        )
}

/// `o.k (+ 1) == i.k`, or `(o.k (+ 1), o.k2) == (i.k, i.k2)`, possibly written
/// inner first, with an optional inner-only condition on `i.v`.
fn predicate(case: &Case) -> Lambda {
    Lambda::new(["o", "i"], |[o, i]| {
        let k = if case.shifted {
            o.clone().field("k") + lit(1)
        } else {
            o.clone().field("k")
        };
        let (outer_key, inner_key) = if case.composite {
            (
                tuple([k, o.field("k2")]),
                tuple([i.clone().field("k"), i.clone().field("k2")]),
            )
        } else {
            (k, i.clone().field("k"))
        };
        let join = if case.flipped {
            inner_key.equals(outer_key)
        } else {
            outer_key.equals(inner_key)
        };
        match case.residual {
            0 => join,
            1 => join.and(i.field("v").gt(lit(1))),
            _ => i.clone().field("v").is_null().or(i.field("v").equals(lit(2))).and(join),
        }
    })
}

struct Tables {
    parent: Arc<EntityDefinition>,
    child: Arc<EntityDefinition>,
    outers: Vec<Arc<Row>>,
    inners: Vec<Arc<Row>>,
}

impl Tables {
    fn new(case: &Case) -> Self {
        let parent = EntityDefinition::new("Parent", ["id", "k", "k2"], ["id"]).unwrap();
        let child = EntityDefinition::new("Child", ["id", "k", "k2", "v"], ["id"]).unwrap();
        let outers = (0..)
            .zip(&case.outers)
            .map(|(id, (k, k2))| {
                parent
                    .row([("id", Value::from(id)), ("k", k.clone()), ("k2", k2.clone())])
                    .unwrap()
            })
            .collect();
        let inners = (100..)
            .zip(&case.inners)
            .map(|(id, (k, k2, v))| {
                child
                    .row([
                        ("id", Value::from(id)),
                        ("k", k.clone()),
                        ("k2", k2.clone()),
                        ("v", v.clone()),
                    ])
                    .unwrap()
            })
            .collect();
        Tables {
            parent,
            child,
            outers,
            inners,
        }
    }
}

fn naive(tables: &Tables, predicate: &Lambda) -> Vec<Vec<i64>> {
    tables
        .outers
        .iter()
        .map(|outer| {
            tables
                .inners
                .iter()
                .filter(|inner| {
                    let args: [&dyn Record; 2] = [&**outer, &***inner];
                    predicate.test(&args).unwrap()
                })
                .filter_map(|inner| inner.identity().as_i64())
                .collect()
        })
        .collect()
}

fn batched(tables: &Tables, predicate: Lambda, push_down: bool) -> Vec<Vec<i64>> {
    let source = Arc::new(InMemorySource::new().with_rows(tables.inners.iter().cloned()));
    let prepared = RelationResolver::build(
        RelationDefinition::new("children", &tables.parent, &tables.child, predicate),
        source,
        Arc::new(Projector::new()),
        &FactorizationCache::new(),
    )
    .unwrap()
    .prepare(&ShapeRequest::new(["v"]))
    .unwrap();

    let config = BatchingConfig {
        push_down_key_filter: push_down,
        ..Default::default()
    };
    let outers = tables.outers.clone();
    let groupings: Result<Result<Vec<Grouping>, BatchError>, TreeError> =
        futures::executor::block_on(ResolutionTree::new(config, NoopRuntime).run(|ctx| async move {
            prepared.many::<Arc<Row>>(&ctx)?.load_many(&outers).await
        }));

    groupings
        .unwrap()
        .unwrap()
        .iter()
        .map(|grouping| {
            grouping
                .iter()
                .filter_map(|proxy| proxy.structural_key().as_i64())
                .collect()
        })
        .collect()
}

fn single(outer: Value, inner: Value, composite: bool) -> Case {
    Case {
        outers: vec![(outer, Value::Null)],
        inners: vec![(inner, Value::Null, Value::Null)],
        residual: 0,
        flipped: false,
        shifted: false,
        composite,
        push_down: true,
    }
}

#[test]
fn ints_and_integral_floats_join_alike() {
    for (outer, inner) in [
        (Value::Int(1), Value::Float(1.0)),
        (Value::Float(-0.0), Value::Int(0)),
        (Value::Float(-0.0), Value::Float(0.0)),
    ] {
        let case = single(outer, inner, false);
        let tables = Tables::new(&case);
        let expected = naive(&tables, &predicate(&case));
        assert_eq!(expected, vec![vec![100]]);
        assert_eq!(batched(&tables, predicate(&case), true), expected);
        assert_eq!(batched(&tables, predicate(&case), false), expected);
    }
}

#[test]
fn composite_keys_with_a_null_component_match_nothing() {
    let case = single(Value::Int(1), Value::Int(1), true);
    let tables = Tables::new(&case);

    assert_eq!(naive(&tables, &predicate(&case)), vec![Vec::<i64>::new()]);
    assert_eq!(batched(&tables, predicate(&case), true), vec![Vec::<i64>::new()]);
}

proptest! {
    #[test]
    fn batched_groupings_match_the_nested_loop(case in arb_case()) {
        let tables = Tables::new(&case);
        let predicate = predicate(&case);

        let expected = naive(&tables, &predicate);
        let actual = batched(&tables, predicate, case.push_down);

        prop_assert_eq!(expected, actual);
    }

    #[test]
    fn outer_conditions_are_never_batched(flipped in any::<bool>(), strict in any::<bool>()) {
        let predicate = Lambda::new(["o", "i"], |[o, i]| {
            let (left, right) = if flipped {
                (i.field("k"), o.field("k"))
            } else {
                (o.field("k"), i.field("k"))
            };
            if strict {
                left.lt(right)
            } else {
                left.equals(right.clone()).or(right.is_null())
            }
        });

        prop_assert!(batched_resolution::factorize::factorize(&predicate).is_err());
    }
}
