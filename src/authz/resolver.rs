//! Per-call access decision pipeline.
//!
//! Steps run in order and stop at the first decisive one: authentication,
//! action resolution, admin bypass, group resolution, self access, the
//! permission check on the current group, then the check on the group a
//! payload moves the instance to.

use serde_json::Value;

use crate::actions::{self, ActionKey};
use crate::config::UnscopedAccess;
use crate::data::InstanceSource;
use crate::errors::{SecError, SecResult};
use crate::models::{GroupRef, GroupRelation, ModelRegistry};
use crate::security::{ModelKind, SecurityPolicy, SecurityProfile};
use crate::store::{PolicyStore, Subject};

use super::decision::{AccessDecision, AllowReason, DenyReason};
use super::method::parse_related;
use super::principal::{AccessRequest, Principal};

pub struct AccessResolver<'a> {
    policy: &'a SecurityPolicy,
    registry: &'a ModelRegistry,
    store: &'a dyn PolicyStore,
    instances: &'a dyn InstanceSource,
}

impl<'a> AccessResolver<'a> {
    pub fn new(
        policy: &'a SecurityPolicy,
        registry: &'a ModelRegistry,
        store: &'a dyn PolicyStore,
        instances: &'a dyn InstanceSource,
    ) -> Self {
        Self {
            policy,
            registry,
            store,
            instances,
        }
    }

    pub async fn check(&self, request: &AccessRequest) -> SecResult<AccessDecision> {
        let options = self.policy.options();
        if !options.enabled {
            return Ok(AccessDecision::Allowed(AllowReason::Disabled));
        }
        if request.options.bypasses_access() {
            tracing::debug!(model = %request.model, method = %request.method, "access checks skipped for call");
            return Ok(AccessDecision::Allowed(AllowReason::Skipped));
        }

        self.registry.get(&request.model)?;
        if matches!(self.policy.kind(&request.model), ModelKind::Unsecured) {
            return Ok(AccessDecision::Allowed(AllowReason::Unsecured));
        }

        let principal = match &request.principal {
            Some(principal) => principal,
            None => {
                tracing::debug!(model = %request.model, method = %request.method, "no principal, denying");
                return Ok(AccessDecision::Denied(DenyReason::Unauthenticated));
            }
        };

        let action = self.resolve_action(&request.model, &request.method);
        tracing::debug!(
            user_id = %principal,
            model = %request.model,
            method = %request.method,
            action = %action,
            "resolved action"
        );

        if self.is_admin(principal).await? {
            tracing::debug!(user_id = %principal, "admin bypass");
            return Ok(AccessDecision::Allowed(AllowReason::Admin));
        }

        let id = request.instance_id.as_deref();
        let payload = request.payload.as_ref();
        let (current, target) = tokio::try_join!(
            self.current_group(&request.model, id, payload),
            self.target_group(&request.model, id, payload),
        )?;

        // An unsaved or orphaned instance is checked against the group its
        // payload names.
        let (current, target) = match (current, target) {
            (Some(current), target) => (current, target),
            (None, Some(target)) => (target, None),
            (None, None) => return Ok(self.unscoped(principal, request)),
        };

        if self.is_self(principal, &current) {
            tracing::debug!(user_id = %principal, group = %current, "self access");
            return Ok(AccessDecision::Allowed(AllowReason::SelfAccess));
        }

        if !self.is_permitted(principal, &current, &action).await? {
            tracing::debug!(user_id = %principal, group = %current, action = %action, "permission denied");
            return Ok(AccessDecision::Denied(DenyReason::NotPermitted {
                group: current,
                action,
            }));
        }

        if let Some(target) = target.filter(|target| target != &current) {
            tracing::debug!(user_id = %principal, from = %current, to = %target, "checking group reassignment");
            let permitted = self.is_self(principal, &target) || self.is_permitted(principal, &target, &action).await?;
            if !permitted {
                return Ok(AccessDecision::Denied(DenyReason::ReassignmentNotPermitted {
                    group: target,
                    action,
                }));
            }
        }

        Ok(AccessDecision::Allowed(AllowReason::Granted))
    }

    /// Action checked on the owning group for `method` invoked on `model`.
    ///
    /// Resource actions are namespaced `RESOURCE:ACTION`, matching the keys
    /// merged into group roles. For `__verb__relation` methods the verb is
    /// resolved on the related model, unless that model is a group, in
    /// which case it is resolved on `model` itself.
    pub fn resolve_action(&self, model: &str, method: &str) -> ActionKey {
        let profile = match self.policy.profile(model) {
            Some(profile) => profile,
            None => return actions::from_method(method, actions::MANAGE),
        };

        if let Some(related) = parse_related(method) {
            match self.related_target(model, related.relation) {
                Some(RelatedTarget::Group) => {
                    return scoped_action(profile, profile.action_for_method(related.verb));
                }
                Some(RelatedTarget::Model(target)) => {
                    return match self.policy.profile(target) {
                        Some(target_profile) => {
                            scoped_action(target_profile, target_profile.action_for_method(related.verb))
                        }
                        None => actions::from_method(related.verb, actions::MANAGE),
                    };
                }
                None => {
                    tracing::debug!(model = %model, relation = %related.relation, "unknown relation in method name");
                }
            }
        }

        scoped_action(profile, profile.action_for_method(method))
    }

    fn related_target(&self, model: &str, relation: &str) -> Option<RelatedTarget<'a>> {
        let relation = self.registry.get(model).ok()?.relation(relation)?;
        if relation.polymorphic.is_some() {
            return Some(RelatedTarget::Group);
        }
        let target = relation.related_model()?;
        if self.policy.is_group(target) {
            Some(RelatedTarget::Group)
        } else {
            Some(RelatedTarget::Model(target))
        }
    }

    pub async fn is_admin(&self, principal: &Principal) -> SecResult<bool> {
        self.store
            .has_role(principal.id(), &self.policy.options().admin_role)
            .await
    }

    /// The group the addressed instance currently belongs to.
    ///
    /// A group model with an id is its own group; a resource with an id is
    /// looked up and its relation followed; without an id the payload is
    /// read instead. A missing instance yields `None`.
    pub async fn current_group(
        &self,
        model: &str,
        id: Option<&str>,
        payload: Option<&Value>,
    ) -> SecResult<Option<GroupRef>> {
        match (self.policy.kind(model), id) {
            (ModelKind::Group, Some(id)) => {
                let found = self.instances.find_by_id(model, id).await?;
                Ok(found.map(|_| GroupRef::new(model, id)))
            }
            (ModelKind::Resource { relation }, Some(id)) => match self.instances.find_by_id(model, id).await? {
                Some(instance) => self.group_in(relation, &instance),
                None => Ok(None),
            },
            (ModelKind::Resource { relation }, None) => match payload {
                Some(payload) => self.group_in(relation, payload),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    /// The group a payload assigns to an existing resource instance.
    pub async fn target_group(
        &self,
        model: &str,
        id: Option<&str>,
        payload: Option<&Value>,
    ) -> SecResult<Option<GroupRef>> {
        match (self.policy.kind(model), id, payload) {
            (ModelKind::Resource { relation }, Some(_), Some(payload)) => self.group_in(relation, payload),
            _ => Ok(None),
        }
    }

    fn group_in(&self, relation: &GroupRelation, data: &Value) -> SecResult<Option<GroupRef>> {
        let partial = match relation.group_in(data) {
            Some(partial) => partial,
            None => return Ok(None),
        };
        if !self.registry.contains(&partial.model) {
            return Err(SecError::unknown_model(partial.model));
        }
        Ok(partial.complete())
    }

    fn is_self(&self, principal: &Principal, group: &GroupRef) -> bool {
        group.id == principal.user_id && self.registry.is_a(&group.model, &self.policy.options().user_model)
    }

    /// Whether the principal, directly or through any role (inherited roles
    /// included) scoped to `group`, holds `action` on `group`.
    pub async fn is_permitted(&self, principal: &Principal, group: &GroupRef, action: &ActionKey) -> SecResult<bool> {
        let roles = self.store.find_user_roles(principal.id(), group, true).await?;

        let mut subjects = Vec::with_capacity(roles.len() + 1);
        subjects.push(Subject::User(principal.user_id.clone()));
        subjects.extend(roles.into_iter().map(|role| Subject::Role(role.id)));

        self.store.check_permission(&subjects, group, action).await
    }

    fn unscoped(&self, principal: &Principal, request: &AccessRequest) -> AccessDecision {
        match self.policy.options().unscoped_access {
            UnscopedAccess::Allow => {
                tracing::warn!(
                    user_id = %principal,
                    model = %request.model,
                    method = %request.method,
                    "no owning group determined, allowing"
                );
                AccessDecision::Allowed(AllowReason::Unscoped)
            }
            UnscopedAccess::Deny => {
                tracing::debug!(model = %request.model, method = %request.method, "no owning group determined, denying");
                AccessDecision::Denied(DenyReason::Unscoped)
            }
        }
    }
}

enum RelatedTarget<'a> {
    Group,
    Model(&'a str),
}

/// Group actions are checked bare; resource actions carry the resource name.
fn scoped_action(profile: &SecurityProfile, action: ActionKey) -> ActionKey {
    if profile.is_group() || action.namespace().is_some() {
        action
    } else {
        ActionKey::namespaced(&profile.model, action.as_str())
    }
}
