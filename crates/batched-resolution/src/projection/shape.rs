use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    sync::{Arc, Mutex},
};

use query_expr::{fold_children, Expr, Fold, Lambda, ParamId, SlotId};

use super::{EntityDefinition, Proxy, Row};
use crate::{ConfigurationError, ConfigurationResult};

/// Why a member is part of a shape. Only `Internal` members stay hidden from
/// consumers of the proxy.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum MemberKind {
    Requested,
    Identity,
    Grouping,
    Internal,
}

impl MemberKind {
    pub fn is_exposed(self) -> bool {
        !matches!(self, MemberKind::Internal)
    }
}

/// Fields one resolution node needs from an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeRequest {
    requested: BTreeSet<Arc<str>>,
    grouping: BTreeSet<Arc<str>>,
    internal: BTreeSet<Arc<str>>,
}

impl ShapeRequest {
    pub fn new<'a>(requested: impl IntoIterator<Item = &'a str>) -> Self {
        ShapeRequest {
            requested: requested.into_iter().map(Arc::from).collect(),
            ..Default::default()
        }
    }

    /// Fields re-correlation depends on, exposed like identity fields.
    #[must_use]
    pub fn with_grouping<'a>(mut self, fields: impl IntoIterator<Item = &'a str>) -> Self {
        self.grouping.extend(fields.into_iter().map(Arc::from));
        self
    }

    /// Fields only later pipeline stages read (sorting, filtering).
    #[must_use]
    pub fn with_dependencies<'a>(mut self, fields: impl IntoIterator<Item = &'a str>) -> Self {
        self.internal.extend(fields.into_iter().map(Arc::from));
        self
    }

    /// Adds every field `lambda` reads through `param` as internal dependencies.
    #[must_use]
    pub fn with_dependencies_of(mut self, lambda: &Lambda, param: ParamId) -> Self {
        self.internal.extend(lambda.member_accesses(param));
        self
    }

    pub fn requested(&self) -> impl Iterator<Item = &str> + '_ {
        self.requested.iter().map(|field| &**field)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ShapeId(u32);

impl From<ShapeId> for i64 {
    fn from(id: ShapeId) -> Self {
        i64::from(id.0)
    }
}

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub(super) struct Member {
    pub(super) name: Arc<str>,
    pub(super) field_index: usize,
    pub(super) kind: MemberKind,
}

/// Closed member subset of an entity, laid out as slots in entity field order.
#[derive(Debug)]
pub struct Shape {
    id: ShapeId,
    entity: Arc<EntityDefinition>,
    members: Vec<Member>,
    slots: HashMap<Arc<str>, SlotId>,
    identity: Vec<SlotId>,
}

impl Shape {
    pub fn id(&self) -> ShapeId {
        self.id
    }

    pub fn entity(&self) -> &Arc<EntityDefinition> {
        &self.entity
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn slot(&self, member: &str) -> Option<SlotId> {
        self.slots.get(member).copied()
    }

    pub fn kind(&self, member: &str) -> Option<MemberKind> {
        let slot = self.slot(member)?;
        Some(self.members[usize::from(slot)].kind)
    }

    /// Members visible to consumers, in slot order.
    pub fn exposed(&self) -> impl Iterator<Item = (SlotId, &str)> + '_ {
        self.members
            .iter()
            .filter(|member| member.kind.is_exposed())
            .filter_map(|member| Some((self.slot(&member.name)?, &*member.name)))
    }

    pub fn members(&self) -> impl Iterator<Item = (&str, MemberKind)> + '_ {
        self.members.iter().map(|member| (&*member.name, member.kind))
    }

    pub(super) fn member(&self, slot: SlotId) -> Option<&Member> {
        self.members.get(usize::from(slot))
    }

    pub(super) fn identity_slots(&self) -> &[SlotId] {
        &self.identity
    }

    /// Recompiles an expression written against the full entity so that it reads
    /// `param`'s fields from this shape's slots. Reading a field outside the shape
    /// is a configuration error.
    pub fn rewrite(&self, lambda: &Lambda, param: ParamId) -> ConfigurationResult<Lambda> {
        let mut rewriter = SlotRewriter {
            shape: self,
            param,
            lambda,
        };
        lambda.clone().try_map_body(&mut rewriter)
    }

    pub fn materialize(self: &Arc<Self>, row: &Arc<Row>) -> Proxy {
        let same_entity = Arc::ptr_eq(row.entity(), &self.entity);
        let slots = self
            .members
            .iter()
            .map(|member| {
                let value = if same_entity {
                    row.value(member.field_index)
                } else {
                    row.get(&member.name)
                };
                value.cloned().unwrap_or_default()
            })
            .collect();
        Proxy::new(self.clone(), row.clone(), slots)
    }

    fn member_list(&self) -> String {
        self.members
            .iter()
            .map(|member| &*member.name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} [{}]", self.entity.name(), self.id, self.member_list())
    }
}

struct SlotRewriter<'a> {
    shape: &'a Shape,
    param: ParamId,
    lambda: &'a Lambda,
}

impl Fold for SlotRewriter<'_> {
    type Error = ConfigurationError;

    fn fold(&mut self, expr: Expr) -> Result<Expr, Self::Error> {
        match expr {
            Expr::Field { base, name } if *base == Expr::Param(self.param) => {
                let entity = self.shape.entity();
                entity.check_field(&name)?;
                match self.shape.slot(&name) {
                    Some(slot) => Ok(Expr::Slot { base, slot, name }),
                    None => Err(ConfigurationError::MemberOutsideProjection {
                        entity: entity.name().to_string(),
                        member: name.to_string(),
                        expression: self.lambda.to_string(),
                        members: self.shape.member_list(),
                    }),
                }
            }
            other => fold_children(self, other),
        }
    }
}

/// Builds shapes and memoizes them by entity and member set, so that every node
/// requesting the same fields shares one layout.
#[derive(Default)]
pub struct Projector {
    shapes: Mutex<HashMap<(Arc<str>, BTreeMap<usize, MemberKind>), Arc<Shape>>>,
}

impl Projector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimal shape holding the requested fields, the identity, grouping fields and
    /// internal dependencies. A field present for several reasons takes the most
    /// visible kind.
    pub fn project(&self, entity: &Arc<EntityDefinition>, request: &ShapeRequest) -> ConfigurationResult<Arc<Shape>> {
        let mut members = BTreeMap::new();
        let mut add = |field: &str, kind: MemberKind| -> ConfigurationResult<()> {
            let index = entity.check_field(field)?;
            members
                .entry(index)
                .and_modify(|existing: &mut MemberKind| *existing = (*existing).min(kind))
                .or_insert(kind);
            Ok(())
        };

        for field in &request.requested {
            add(field, MemberKind::Requested)?;
        }
        for field in entity.identity() {
            add(field, MemberKind::Identity)?;
        }
        for field in &request.grouping {
            add(field, MemberKind::Grouping)?;
        }
        for field in &request.internal {
            add(field, MemberKind::Internal)?;
        }

        let slot_ids = (0..members.len())
            .map(SlotId::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ConfigurationError::TooManyMembers {
                entity: entity.name().to_string(),
                count: members.len(),
            })?;

        let mut shapes = self.shapes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let next_id = ShapeId(shapes.len() as u32);
        let shape = shapes
            .entry((entity.name().into(), members))
            .or_insert_with_key(|(_, members)| {
                let members: Vec<Member> = members
                    .iter()
                    .filter_map(|(index, kind)| {
                        Some(Member {
                            name: entity.field_name(*index)?.clone(),
                            field_index: *index,
                            kind: *kind,
                        })
                    })
                    .collect();
                let slots: HashMap<Arc<str>, SlotId> = members
                    .iter()
                    .zip(&slot_ids)
                    .map(|(member, slot)| (member.name.clone(), *slot))
                    .collect();
                let shape = Shape {
                    id: next_id,
                    entity: entity.clone(),
                    identity: entity.identity().filter_map(|field| slots.get(field).copied()).collect(),
                    slots,
                    members,
                };
                tracing::debug!("projected {shape}");
                Arc::new(shape)
            });

        Ok(shape.clone())
    }

    pub fn len(&self) -> usize {
        self.shapes.lock().map(|shapes| shapes.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
