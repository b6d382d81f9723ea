//! One-to-many relation resolvers.
//!
//! A relation is compiled once at schema-build time: its predicate is factorized
//! and its fields validated. Per resolution node it is then prepared for the
//! requested inner fields, and per request it hands out loaders that batch every
//! outer row of a tick into one grouped query.


use std::{
    collections::{BTreeSet, HashMap, HashSet},
    rc::Rc,
    sync::Arc,
};

use query_expr::{Lambda, ParamId, Record, Value};

use crate::{
    batching::{BatchFn, BatchKey, Loader, TreeContext},
    factorize::{Factorization, FactorizationCache},
    projection::{EntityDefinition, Projector, Proxy, Shape, ShapeRequest},
    source::{DataSource, Grouping, Ordering, Query},
    BatchError, BatchResult, ConfigurationError, ConfigurationResult,
};

/// Key selectors, residuals and orderings are single-parameter lambdas.
const ROW: ParamId = ParamId::new(0);

/// Schema-level description of a relation `outer.name -> [inner]`.
#[derive(Debug, Clone)]
pub struct RelationDefinition {
    name: String,
    outer: Arc<EntityDefinition>,
    inner: Arc<EntityDefinition>,
    predicate: Lambda,
    order_by: Vec<Ordering>,
}

impl RelationDefinition {
    /// `predicate` takes `(outer, inner)`.
    pub fn new(name: &str, outer: &Arc<EntityDefinition>, inner: &Arc<EntityDefinition>, predicate: Lambda) -> Self {
        RelationDefinition {
            name: name.to_string(),
            outer: outer.clone(),
            inner: inner.clone(),
            predicate,
            order_by: Vec::new(),
        }
    }

    /// Orders related elements by `key`, a lambda over the inner entity.
    #[must_use]
    pub fn order_by(mut self, key: Lambda, descending: bool) -> Self {
        self.order_by.push(Ordering { key, descending });
        self
    }
}

pub struct RelationResolver {
    field: Arc<str>,
    outer: Arc<EntityDefinition>,
    inner: Arc<EntityDefinition>,
    factorization: Arc<Factorization>,
    order_by: Vec<Ordering>,
    source: Arc<dyn DataSource>,
    projector: Arc<Projector>,
}

impl RelationResolver {
    /// Factorizes the predicate and checks every field it and the orderings read.
    /// Anything wrong with the relation surfaces here, never at request time.
    pub fn build(
        definition: RelationDefinition,
        source: Arc<dyn DataSource>,
        projector: Arc<Projector>,
        factorizations: &FactorizationCache,
    ) -> ConfigurationResult<Self> {
        let RelationDefinition {
            name,
            outer,
            inner,
            predicate,
            order_by,
        } = definition;

        let factorization = factorizations.get_or_factorize(&predicate)?;
        check_fields(&outer, &factorization.outer_key)?;
        check_fields(&inner, &factorization.inner_key)?;
        if let Some(residual) = &factorization.inner_residual {
            check_fields(&inner, residual)?;
        }
        for ordering in &order_by {
            check_fields(&inner, &ordering.key)?;
        }

        let field: Arc<str> = format!("{}.{name}", outer.name()).into();
        tracing::debug!(
            "built relation {field} with outer key `{}` and inner key `{}`",
            factorization.outer_key,
            factorization.inner_key
        );

        Ok(RelationResolver {
            field,
            outer,
            inner,
            factorization,
            order_by,
            source,
            projector,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn factorization(&self) -> &Factorization {
        &self.factorization
    }

    /// Outer fields the relation key is computed from. Parent projections must
    /// include them.
    pub fn outer_dependencies(&self) -> BTreeSet<Arc<str>> {
        self.factorization.outer_key.member_accesses(ROW)
    }

    /// Projects the inner entity for a node requesting `requested`, adding the
    /// grouping and ordering fields the query depends on.
    pub fn prepare(&self, requested: &ShapeRequest) -> ConfigurationResult<PreparedRelation> {
        let grouping = self.factorization.inner_key.member_accesses(ROW);
        let mut request = requested
            .clone()
            .with_grouping(grouping.iter().map(|field| &**field));
        for ordering in &self.order_by {
            request = request.with_dependencies_of(&ordering.key, ROW);
        }

        let shape = self.projector.project(&self.inner, &request)?;
        let group_key = shape.rewrite(&self.factorization.inner_key, ROW)?;
        let order_by = self
            .order_by
            .iter()
            .map(|ordering| {
                Ok(Ordering {
                    key: shape.rewrite(&ordering.key, ROW)?,
                    descending: ordering.descending,
                })
            })
            .collect::<ConfigurationResult<Vec<_>>>()?;

        Ok(PreparedRelation {
            field: self.field.clone(),
            outer: self.outer.clone(),
            outer_key: self.factorization.outer_key.clone(),
            batch: RelationBatch(Arc::new(RelationQuery {
                source: self.source.clone(),
                shape,
                inner_key: self.factorization.inner_key.clone(),
                inner_residual: self.factorization.inner_residual.clone(),
                group_key,
                order_by,
            })),
        })
    }
}

/// A relation projected for one resolution node.
#[derive(Clone)]
pub struct PreparedRelation {
    field: Arc<str>,
    outer: Arc<EntityDefinition>,
    outer_key: Lambda,
    batch: RelationBatch,
}

impl PreparedRelation {
    pub fn shape(&self) -> &Arc<Shape> {
        &self.batch.0.shape
    }

    /// Loader over anything exposing the outer key fields by name, full rows
    /// typically.
    pub fn many<O: Record + 'static>(&self, ctx: &TreeContext) -> ConfigurationResult<Loader<O, Grouping>> {
        let outer_key = self.outer_key.clone();
        self.loader(ctx, move |outer: &O| Ok(outer_key.eval(&[outer as &dyn Record])?))
    }

    /// Binds the relation to proxies of `outer_shape`, the projection of a parent
    /// relation. The outer key is rewritten to read the proxy slots, so the key
    /// fields may be internal members of that shape. Done once while building the
    /// schema, next to the parent's own preparation.
    pub fn for_parent(&self, outer_shape: &Arc<Shape>) -> ConfigurationResult<NestedRelation> {
        if outer_shape.entity().name() != self.outer.name() {
            return Err(ConfigurationError::EntityMismatch {
                relation: self.field.to_string(),
                expected: self.outer.name().to_string(),
                actual: outer_shape.entity().name().to_string(),
            });
        }

        Ok(NestedRelation {
            outer_key: outer_shape.rewrite(&self.outer_key, ROW)?,
            outer_shape: outer_shape.clone(),
            relation: self.clone(),
        })
    }

    /// First related element, if any.
    pub fn one<O: Record + 'static>(&self, ctx: &TreeContext) -> ConfigurationResult<Loader<O, Option<Rc<Proxy>>>> {
        Ok(self.many(ctx)?.then(|grouping| grouping.first().cloned()))
    }

    pub fn count<O: Record + 'static>(&self, ctx: &TreeContext) -> ConfigurationResult<Loader<O, usize>> {
        Ok(self.many(ctx)?.then(|grouping| grouping.len()))
    }

    fn loader<O: 'static>(
        &self,
        ctx: &TreeContext,
        outer_key: impl Fn(&O) -> BatchResult<Value> + 'static,
    ) -> ConfigurationResult<Loader<O, Grouping>> {
        let batch = self.batch.clone();
        let batch_key = BatchKey::new(self.field.clone(), &batch).with_context(i64::from(batch.0.shape.id()));

        ctx.loader(
            batch_key,
            move |outer: &O| -> BatchResult<Option<Value>> {
                let key = outer_key(outer)?.into_key();
                Ok((!key.is_null()).then_some(key))
            },
            batch,
        )
    }
}

/// A prepared relation loading for the proxies of one parent projection.
#[derive(Clone)]
pub struct NestedRelation {
    relation: PreparedRelation,
    outer_shape: Arc<Shape>,
    outer_key: Lambda,
}

impl NestedRelation {
    pub fn shape(&self) -> &Arc<Shape> {
        self.relation.shape()
    }

    pub fn outer_shape(&self) -> &Arc<Shape> {
        &self.outer_shape
    }

    /// Loader over proxies of the parent projection. Slots are positional, so a
    /// proxy of any other shape fails its load.
    pub fn many(&self, ctx: &TreeContext) -> ConfigurationResult<Loader<Rc<Proxy>, Grouping>> {
        let relation = self.relation.field.clone();
        let outer_shape = self.outer_shape.clone();
        let outer_key = self.outer_key.clone();

        self.relation.loader(ctx, move |outer: &Rc<Proxy>| {
            if !Arc::ptr_eq(outer.shape(), &outer_shape) {
                return Err(BatchError::ShapeMismatch {
                    relation: relation.to_string(),
                    expected: outer_shape.to_string(),
                    actual: outer.shape().to_string(),
                });
            }
            Ok(outer_key.eval(&[outer as &dyn Record])?)
        })
    }
}

fn check_fields(entity: &EntityDefinition, lambda: &Lambda) -> ConfigurationResult<()> {
    for field in lambda.member_accesses(ROW) {
        entity.check_field(&field)?;
    }
    Ok(())
}

/// Grouped query serving one prepared relation.
struct RelationQuery {
    source: Arc<dyn DataSource>,
    shape: Arc<Shape>,
    inner_key: Lambda,
    inner_residual: Option<Lambda>,
    group_key: Lambda,
    order_by: Vec<Ordering>,
}

#[derive(Clone)]
struct RelationBatch(Arc<RelationQuery>);

#[async_trait::async_trait(?Send)]
impl BatchFn for RelationBatch {
    type Key = Value;
    type Value = Grouping;

    fn name(&self) -> &'static str {
        "relation"
    }

    async fn load(&self, ctx: &TreeContext, keys: &[Value]) -> BatchResult<HashMap<Value, Grouping>> {
        let batch = &self.0;
        let mut query = Query::project(batch.shape.clone());
        if let Some(residual) = &batch.inner_residual {
            query = query.filter(residual.clone());
        }
        if ctx.config().push_down_key_filter {
            query = query.key_in(batch.inner_key.clone(), keys.to_vec());
        }
        for ordering in &batch.order_by {
            query = query.order_by(ordering.key.clone(), ordering.descending);
        }

        let groupings = batch.source.fetch(&query.group_by(batch.group_key.clone())).await?;

        let requested: HashSet<&Value> = keys.iter().collect();
        Ok(groupings
            .into_iter()
            .filter(|grouping| requested.contains(grouping.key()))
            .map(|grouping| (grouping.key().clone(), grouping))
            .collect())
    }

    fn missing(&self, key: &Value) -> Grouping {
        Grouping::empty(key.clone())
    }
}
