//! Partial projections of rows.
//!
//! A [`Shape`] is the closed set of members one resolution node needs from an
//! entity: the requested fields, the identity, grouping fields and whatever later
//! stages read. Shapes are computed once per distinct member set and rows are
//! materialized into [`Proxy`] values laid out by slot.

mod entity;
mod hooks;
mod proxy;
mod shape;


pub use entity::{EntityDefinition, Row};
pub use hooks::{HookId, HookRegistry, PostLoadHook};
pub use proxy::Proxy;
pub use shape::{MemberKind, Projector, Shape, ShapeId, ShapeRequest};
