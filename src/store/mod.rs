//! Policy-graph store: roles, memberships, inheritance edges and grants.

mod memory;
mod sqlite;

pub use memory::MemoryPolicyStore;
pub use sqlite::SqlitePolicyStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actions::ActionKey;
use crate::errors::{SecError, SecResult};
use crate::models::EntityRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipState {
    Active,
    Pending,
    Disabled,
}

impl MembershipState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipState::Active => "active",
            MembershipState::Pending => "pending",
            MembershipState::Disabled => "disabled",
        }
    }

    pub fn parse(value: &str) -> SecResult<Self> {
        match value {
            "active" => Ok(MembershipState::Active),
            "pending" => Ok(MembershipState::Pending),
            "disabled" => Ok(MembershipState::Disabled),
            other => Err(SecError::store(format!("unknown membership state {other:?}"))),
        }
    }
}

/// A live role record. `scope` is `None` for global roles such as `admin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: String,
    pub name: String,
    pub scope: Option<EntityRef>,
}

/// Assignment of a user to a role, carrying the role's scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: String,
    pub role_id: String,
    pub scope: Option<EntityRef>,
    pub state: MembershipState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct MembershipFilter {
    pub user_id: Option<String>,
    pub scope_type: Option<String>,
    pub scope_id: Option<String>,
    pub state: Option<MembershipState>,
}

impl MembershipFilter {
    /// Active memberships of `user_id` in groups of type `scope_type`.
    pub fn active_for(user_id: impl Into<String>, scope_type: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            scope_type: Some(scope_type.into()),
            scope_id: None,
            state: Some(MembershipState::Active),
        }
    }

    pub fn matches(&self, membership: &Membership) -> bool {
        if let Some(user_id) = &self.user_id {
            if &membership.user_id != user_id {
                return false;
            }
        }
        if let Some(state) = self.state {
            if membership.state != state {
                return false;
            }
        }
        let scope = membership.scope.as_ref();
        if let Some(scope_type) = &self.scope_type {
            if scope.map(|s| &s.model) != Some(scope_type) {
                return false;
            }
        }
        if let Some(scope_id) = &self.scope_id {
            if scope.map(|s| &s.id) != Some(scope_id) {
                return false;
            }
        }
        true
    }
}

/// Who a permission is checked or granted for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    User(String),
    Role(String),
}

impl Subject {
    /// Stable storage key, `user:<id>` or `role:<id>`.
    pub fn key(&self) -> String {
        match self {
            Subject::User(id) => format!("user:{id}"),
            Subject::Role(id) => format!("role:{id}"),
        }
    }
}

/// Storage and query primitives of the role/permission graph.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Create a role scoped to `scope`, returning the existing record if one
    /// with the same name already exists there.
    async fn create_role(&self, scope: Option<&EntityRef>, name: &str) -> SecResult<RoleRecord>;

    /// Make `role` inherit from the named roles of its own scope.
    async fn inherit_role_from(&self, role: &RoleRecord, parents: &[String]) -> SecResult<()>;

    /// Roles scoped to `scope`, optionally restricted to `names`.
    async fn find_roles(&self, scope: &EntityRef, names: Option<&[String]>) -> SecResult<Vec<RoleRecord>>;

    /// Roles `user_id` holds actively in `scope`, plus inherited parents when asked.
    async fn find_user_roles(
        &self,
        user_id: &str,
        scope: &EntityRef,
        include_inherited: bool,
    ) -> SecResult<Vec<RoleRecord>>;

    async fn find_memberships(&self, filter: &MembershipFilter) -> SecResult<Vec<Membership>>;

    async fn assign_memberships(
        &self,
        user_id: &str,
        roles: &[RoleRecord],
        state: MembershipState,
    ) -> SecResult<()>;

    /// True if any subject holds `action` on `entity`.
    async fn check_permission(&self, subjects: &[Subject], entity: &EntityRef, action: &ActionKey) -> SecResult<bool>;

    /// True if `user_id` actively holds the global role `role_name`.
    async fn has_role(&self, user_id: &str, role_name: &str) -> SecResult<bool>;

    /// Grant `actions` on `entity` to `role`.
    async fn allow(&self, role: &RoleRecord, entity: &EntityRef, actions: &[ActionKey]) -> SecResult<()>;

    /// Record the compiled action keys of a model.
    async fn register_actions(&self, model: &str, actions: &[ActionKey]) -> SecResult<()>;

    /// Enable the store's built-in row security for a model.
    async fn secure_model(&self, model: &str, rowlevel: bool) -> SecResult<()>;
}
