//! Host model metadata consumed by the security layer.

pub mod registry;
pub mod relation;

pub use registry::{ModelDef, ModelRegistry};
pub use relation::{id_string, EntityRef, GroupRef, GroupRelation, PartialGroupRef, Polymorphic, RelationDef, RelationKind};
