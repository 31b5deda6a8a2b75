//! Group-scoped role based access control for multi-tenant data models.
//!
//! Models are classified at boot as groups (tenancy roots owning scoped
//! roles) or resources (owned by one group instance). Declarative security
//! settings are compiled once into an immutable [`SecurityPolicy`]; each
//! call is then authorized against the principal's roles in the owning
//! group, list queries are narrowed to the principal's groups, and new
//! instances are seeded with default roles and grants.

pub mod actions;
pub mod app;
pub mod authz;
pub mod config;
pub mod data;
pub mod db;
pub mod errors;
pub mod models;
pub mod query;
pub mod security;
pub mod store;

pub use app::GroupSecurity;
pub use authz::{AccessDecision, AccessOptions, AccessRequest, Principal};
pub use config::SecurityOptions;
pub use errors::{SecError, SecResult};
pub use models::ModelRegistry;
pub use security::SecurityPolicy;
