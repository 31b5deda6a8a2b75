//! Boot-time policy compilation and instance seeding.

pub mod classifier;
pub mod compiler;
mod profile;
mod seeding;

pub use compiler::compile;
pub use profile::{ActionDef, ModelKind, RoleDef, SecurityPolicy, SecurityProfile};
pub use seeding::{SeedReport, Seeder};
