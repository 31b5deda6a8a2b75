//! Authorization: per-call access decisions and row-level query scoping.
//!
//! - [`AccessResolver`] decides whether a principal may run a method on a
//!   model instance, checking roles scoped to the owning group.
//! - [`RowFilterBuilder`] narrows list/count predicates to the groups the
//!   principal actively belongs to.

mod decision;
mod filter;
mod method;
mod principal;
mod resolver;

pub use decision::{AccessDecision, AllowReason, DenyReason};
pub use filter::RowFilterBuilder;
pub use method::{parse_related, RelatedMethod};
pub use principal::{AccessOptions, AccessRequest, Principal};
pub use resolver::AccessResolver;
