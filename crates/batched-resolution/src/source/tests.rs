use std::sync::Arc;

use pretty_assertions::assert_eq;
use query_expr::{lit, Lambda, ParamId, Value};

use super::*;
use crate::projection::{EntityDefinition, Projector, ShapeRequest};

const C: ParamId = ParamId::new(0);

fn city_entity() -> Arc<EntityDefinition> {
    EntityDefinition::new("City", ["id", "country", "city", "population"], ["id"]).unwrap()
}

fn cities(entity: &Arc<EntityDefinition>) -> InMemorySource {
    let city = |id: i64, country: Option<&str>, name: &str, population: Option<i64>| {
        entity
            .row([
                ("id", Value::from(id)),
                ("country", country.into()),
                ("city", name.into()),
                ("population", population.into()),
            ])
            .unwrap()
    };

    InMemorySource::new().with_rows([
        city(10, Some("US"), "NYC", Some(8000)),
        city(11, Some("US"), "LA", Some(4000)),
        city(12, Some("DE"), "Berlin", Some(3600)),
        city(13, Some("US"), "Springfield", None),
        city(14, None, "Nowhere", Some(5)),
    ])
}

fn by_country() -> Lambda {
    Lambda::new(["c"], |[c]| c.field("country"))
}

fn by_population() -> Lambda {
    Lambda::new(["c"], |[c]| c.field("population"))
}

fn names(groupings: &[Grouping]) -> Vec<(Value, Vec<String>)> {
    groupings
        .iter()
        .map(|grouping| {
            let names = grouping
                .iter()
                .map(|proxy| proxy.get("city").and_then(Value::as_str).unwrap_or_default().to_string())
                .collect();
            (grouping.key().clone(), names)
        })
        .collect()
}

#[tokio::test]
async fn groups_follow_first_appearance_and_skip_null_keys() {
    let entity = city_entity();
    let source = cities(&entity);
    let shape = Projector::new()
        .project(&entity, &ShapeRequest::new(["city"]).with_grouping(["country"]))
        .unwrap();

    let query = Query::project(shape.clone()).group_by(shape.rewrite(&by_country(), C).unwrap());
    let groupings = source.fetch(&query).await.unwrap();

    insta::assert_json_snapshot!(groupings, @r###"
    [
      {
        "key": "US",
        "elements": [
          {
            "id": 10,
            "country": "US",
            "city": "NYC"
          },
          {
            "id": 11,
            "country": "US",
            "city": "LA"
          },
          {
            "id": 13,
            "country": "US",
            "city": "Springfield"
          }
        ]
      },
      {
        "key": "DE",
        "elements": [
          {
            "id": 12,
            "country": "DE",
            "city": "Berlin"
          }
        ]
      }
    ]
    "###);
}

#[tokio::test]
async fn ordering_puts_nulls_first() {
    let entity = city_entity();
    let source = cities(&entity);
    let request = ShapeRequest::new(["city"])
        .with_grouping(["country"])
        .with_dependencies_of(&by_population(), C);
    let shape = Projector::new().project(&entity, &request).unwrap();

    let ascending = Query::project(shape.clone())
        .order_by(shape.rewrite(&by_population(), C).unwrap(), false)
        .group_by(shape.rewrite(&by_country(), C).unwrap());
    let descending = Query::project(shape.clone())
        .order_by(shape.rewrite(&by_population(), C).unwrap(), true)
        .group_by(shape.rewrite(&by_country(), C).unwrap());

    let us = Value::from("US");
    let de = Value::from("DE");
    assert_eq!(
        names(&source.fetch(&ascending).await.unwrap()),
        vec![
            (us.clone(), vec!["Springfield".to_string(), "LA".into(), "NYC".into()]),
            (de.clone(), vec!["Berlin".to_string()]),
        ]
    );
    assert_eq!(
        names(&source.fetch(&descending).await.unwrap()),
        vec![
            (us, vec!["NYC".to_string(), "LA".into(), "Springfield".into()]),
            (de, vec!["Berlin".to_string()]),
        ]
    );
}

#[tokio::test]
async fn filters_and_key_filter_apply_to_rows() {
    let entity = city_entity();
    let source = cities(&entity);
    let shape = Projector::new()
        .project(&entity, &ShapeRequest::new(["city"]).with_grouping(["country"]))
        .unwrap();

    let query = Query::project(shape.clone())
        .filter(Lambda::new(["c"], |[c]| c.field("population").gt(lit(1000))))
        .filter(Lambda::always("c"))
        .key_in(by_country(), vec!["US".into(), "FR".into()])
        .group_by(shape.rewrite(&by_country(), C).unwrap());
    let groupings = source.fetch(&query).await.unwrap();

    assert_eq!(
        names(&groupings),
        vec![(Value::from("US"), vec!["NYC".to_string(), "LA".into()])]
    );
    assert_eq!(source.query_count(), 1);
    insta::assert_snapshot!(source.executed_queries().join("\n"), @r###"from City#0 [id, country, city] filter (c => c.population > 1000) key (c => c.country) in ("US", "FR") group (c => c.country@1)"###);
}

#[tokio::test]
async fn unknown_entities_are_reported() {
    let entity = EntityDefinition::new("Planet", ["id"], ["id"]).unwrap();
    let source = cities(&city_entity());
    let shape = Projector::new().project(&entity, &ShapeRequest::default()).unwrap();
    let id = shape.rewrite(&Lambda::new(["p"], |[p]| p.field("id")), C).unwrap();

    let err = source.fetch(&Query::project(shape).group_by(id)).await.unwrap_err();

    assert_eq!(err, crate::SourceError::UnknownEntity("Planet".into()));
}

#[tokio::test]
async fn unavailable_sources_fail_every_fetch() {
    let entity = city_entity();
    let source = cities(&entity);
    let shape = Projector::new()
        .project(&entity, &ShapeRequest::new(["city"]).with_grouping(["country"]))
        .unwrap();
    let query = Query::project(shape.clone()).group_by(shape.rewrite(&by_country(), C).unwrap());

    source.set_unavailable(Some("maintenance".into()));
    let err = source.fetch(&query).await.unwrap_err();
    insta::assert_snapshot!(err, @"data source is unavailable: maintenance");

    source.set_unavailable(None);
    assert_eq!(source.fetch(&query).await.unwrap().len(), 2);
}

#[test]
fn empty_groupings_keep_their_key() {
    let grouping = Grouping::empty("FR".into());

    assert!(grouping.is_empty());
    assert_eq!(grouping.key(), &Value::from("FR"));
    assert!(grouping.first().is_none());
    assert!(Grouping::default().key().is_null());
}
