use std::collections::BTreeMap;

use serde::Serialize;

use crate::actions::{self, ActionKey};
use crate::config::SecurityOptions;
use crate::models::GroupRelation;

/// Semantic action declared for a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionDef {
    pub name: ActionKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Primitive methods mapped to this action; empty for manual actions.
    pub methods: Vec<String>,
}

/// Role declared on a group model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub actions: Vec<ActionKey>,
    /// Parent roles whose grants this role inherits.
    pub inherits: Vec<String>,
}

/// Boot-time classification of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelKind {
    /// Tenancy root owning group-scoped roles.
    Group,
    /// Entity owned by exactly one group instance.
    Resource { relation: GroupRelation },
    /// Governed purely by the host's default behaviour.
    Unsecured,
}

impl ModelKind {
    pub fn is_group(&self) -> bool {
        matches!(self, ModelKind::Group)
    }

    pub fn group_relation(&self) -> Option<&GroupRelation> {
        match self {
            ModelKind::Resource { relation } => Some(relation),
            _ => None,
        }
    }
}

/// Compiled, normalized security settings of one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityProfile {
    pub model: String,
    pub kind: ModelKind,
    pub roles: BTreeMap<String, RoleDef>,
    pub actions: BTreeMap<ActionKey, ActionDef>,
    pub permissions: BTreeMap<String, Vec<ActionKey>>,
    /// Whether the store applies its built-in row security to instances.
    pub rowlevel: bool,
    /// Allow-list of group types for a polymorphic group relation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub polymorphic_types: Vec<String>,
}

impl SecurityProfile {
    pub fn new(model: impl Into<String>, kind: ModelKind) -> Self {
        Self {
            model: model.into(),
            kind,
            roles: BTreeMap::new(),
            actions: BTreeMap::new(),
            permissions: BTreeMap::new(),
            rowlevel: false,
            polymorphic_types: Vec::new(),
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind.is_group()
    }

    pub fn group_relation(&self) -> Option<&GroupRelation> {
        self.kind.group_relation()
    }

    pub fn action_keys(&self) -> impl Iterator<Item = &ActionKey> {
        self.actions.keys()
    }

    /// Action for a method: a declared action listing the method wins, then
    /// the built-in taxonomy, then `MANAGE`.
    pub fn action_for_method(&self, method: &str) -> ActionKey {
        self.actions
            .values()
            .find(|action| action.methods.iter().any(|m| m == method))
            .map(|action| action.name.clone())
            .unwrap_or_else(|| actions::from_method(method, actions::MANAGE))
    }

    /// `permissions[role]` with the wildcard expanded to every action key
    /// currently defined on this profile.
    pub fn permitted_actions(&self, role: &str) -> Vec<ActionKey> {
        match self.permissions.get(role) {
            Some(permitted) => expand_wildcard(permitted, self.action_keys()),
            None => Vec::new(),
        }
    }

    /// Actions granted to `role` over a newly persisted instance of this model.
    pub fn default_grants(&self, role: &str) -> Vec<ActionKey> {
        let mut grants = Vec::new();
        if self.is_group() {
            if let Some(def) = self.roles.get(role) {
                grants.extend(def.actions.iter().cloned());
            }
        }
        for action in self.permitted_actions(role) {
            if !grants.contains(&action) {
                grants.push(action);
            }
        }
        grants
    }

    /// Role names seeded for new instances: declared roles on a group,
    /// permission holders on a resource.
    pub fn seeded_role_names(&self) -> Vec<String> {
        if self.is_group() {
            self.roles.keys().cloned().collect()
        } else {
            self.permissions.keys().cloned().collect()
        }
    }
}

pub(crate) fn expand_wildcard<'a>(
    permitted: &[ActionKey],
    all: impl Iterator<Item = &'a ActionKey>,
) -> Vec<ActionKey> {
    if permitted.iter().any(ActionKey::is_wildcard) {
        all.cloned().collect()
    } else {
        permitted.to_vec()
    }
}

/// Immutable per-model profile map, built once at boot.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityPolicy {
    profiles: BTreeMap<String, SecurityProfile>,
    #[serde(skip)]
    options: SecurityOptions,
}

impl SecurityPolicy {
    pub(crate) fn new(profiles: BTreeMap<String, SecurityProfile>, options: SecurityOptions) -> Self {
        Self { profiles, options }
    }

    pub fn options(&self) -> &SecurityOptions {
        &self.options
    }

    pub fn profile(&self, model: &str) -> Option<&SecurityProfile> {
        self.profiles.get(model)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &SecurityProfile> {
        self.profiles.values()
    }

    pub fn kind(&self, model: &str) -> &ModelKind {
        const UNSECURED: &ModelKind = &ModelKind::Unsecured;
        self.profiles.get(model).map(|p| &p.kind).unwrap_or(UNSECURED)
    }

    pub fn is_group(&self, model: &str) -> bool {
        self.kind(model).is_group()
    }

    pub fn is_user_model(&self, model: &str) -> bool {
        model == self.options.user_model
    }

    pub fn groups(&self) -> impl Iterator<Item = &SecurityProfile> {
        self.profiles.values().filter(|p| p.is_group())
    }

    pub fn resources(&self) -> impl Iterator<Item = &SecurityProfile> {
        self.profiles.values().filter(|p| p.group_relation().is_some())
    }
}
