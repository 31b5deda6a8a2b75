//! Row-level filter builder for list and count queries.

use std::collections::BTreeSet;

use futures::future::try_join_all;
use serde_json::Value;

use crate::errors::{SecError, SecResult};
use crate::models::{id_string, GroupRelation, ModelRegistry};
use crate::query;
use crate::security::{ModelKind, SecurityPolicy};
use crate::store::{MembershipFilter, PolicyStore};

use super::principal::{AccessOptions, Principal};

pub struct RowFilterBuilder<'a> {
    policy: &'a SecurityPolicy,
    registry: &'a ModelRegistry,
    store: &'a dyn PolicyStore,
}

impl<'a> RowFilterBuilder<'a> {
    pub fn new(policy: &'a SecurityPolicy, registry: &'a ModelRegistry, store: &'a dyn PolicyStore) -> Self {
        Self {
            policy,
            registry,
            store,
        }
    }

    /// Rewrite a list/count `where` so it only matches rows of groups the
    /// principal is an active member of. Returns the predicate to run with,
    /// which is `existing` unchanged when no filtering applies.
    pub async fn scope_where(
        &self,
        principal: Option<&Principal>,
        model: &str,
        existing: Option<Value>,
        options: &AccessOptions,
    ) -> SecResult<Option<Value>> {
        if !self.policy.options().enabled || options.bypasses_group_filter() {
            tracing::debug!(model = %model, "group filter skipped for call");
            return Ok(existing);
        }

        let principal = match principal {
            Some(principal) => principal,
            None => {
                tracing::debug!(model = %model, "no principal, skipping group filter");
                return Ok(existing);
            }
        };

        let id_name = &self.registry.get(model)?.id_name;
        if existing.as_ref().and_then(|w| w.get(id_name)).and_then(id_string).is_some() {
            tracing::debug!(model = %model, "lookup by id, skipping group filter");
            return Ok(existing);
        }

        if !options.scoped {
            return Ok(existing);
        }
        if matches!(self.policy.kind(model), ModelKind::Unsecured) {
            return Ok(existing);
        }

        if self
            .store
            .has_role(principal.id(), &self.policy.options().admin_role)
            .await?
        {
            tracing::debug!(user_id = %principal, model = %model, "admin, skipping group filter");
            return Ok(existing);
        }

        let group = self.group_predicate(principal, model, existing.as_ref()).await?;
        tracing::debug!(model = %model, original = ?existing, group = %group, "applying group filter");
        Ok(Some(query::and_merge(existing, group)))
    }

    /// Predicate restricting `model` rows to the principal's groups.
    pub async fn group_predicate(
        &self,
        principal: &Principal,
        model: &str,
        existing: Option<&Value>,
    ) -> SecResult<Value> {
        match self.policy.kind(model) {
            ModelKind::Group => {
                let id_name = &self.registry.get(model)?.id_name;
                self.candidate_predicate(principal, model, id_name, None).await
            }
            ModelKind::Resource { relation } => {
                let candidates = self.candidate_types(model, relation, existing)?;
                let alternatives = try_join_all(candidates.iter().map(|candidate| {
                    self.candidate_predicate(
                        principal,
                        candidate,
                        &relation.foreign_key,
                        relation.discriminator.as_deref(),
                    )
                }))
                .await?;
                query::any_of(alternatives).ok_or_else(|| {
                    SecError::configuration(format!("model {model} has no group types to filter by"))
                })
            }
            ModelKind::Unsecured => {
                let rel = self.policy.options().resource_options(model).rel.unwrap_or_default();
                Err(SecError::configuration(format!(
                    "access denied: model {model} has no relation {rel:?} to a group"
                )))
            }
        }
    }

    /// Group types a resource row may belong to: the fixed relation target,
    /// else the discriminator values already in the query, else the
    /// declared polymorphic types, else every configured group model.
    fn candidate_types(
        &self,
        model: &str,
        relation: &GroupRelation,
        existing: Option<&Value>,
    ) -> SecResult<Vec<String>> {
        let mut candidates = match &relation.target_type {
            Some(target) => vec![target.clone()],
            None => Vec::new(),
        };

        if candidates.is_empty() {
            if let (Some(discriminator), Some(existing)) = (&relation.discriminator, existing) {
                candidates = string_values(existing.get(discriminator));
            }
        }
        if candidates.is_empty() {
            if let Some(profile) = self.policy.profile(model) {
                candidates = profile.polymorphic_types.clone();
            }
        }
        if candidates.is_empty() {
            candidates = self.policy.options().groups.clone();
        }

        for candidate in &candidates {
            self.registry.get(candidate)?;
        }
        Ok(candidates)
    }

    async fn candidate_predicate(
        &self,
        principal: &Principal,
        group_type: &str,
        field: &str,
        discriminator: Option<&str>,
    ) -> SecResult<Value> {
        let user_model = &self.policy.options().user_model;
        let mut predicate = if self.registry.is_a(group_type, user_model) {
            query::field_eq(field, Value::String(principal.user_id.clone()))
        } else {
            let memberships = self
                .store
                .find_memberships(&MembershipFilter::active_for(principal.id(), group_type))
                .await?;
            let scope_ids: BTreeSet<String> = memberships
                .into_iter()
                .filter_map(|m| m.scope.map(|scope| scope.id))
                .collect();
            query::field_in(field, scope_ids.into_iter().map(Value::String).collect())
        };

        if let (Some(discriminator), Some(map)) = (discriminator, predicate.as_object_mut()) {
            map.insert(discriminator.to_string(), Value::String(group_type.to_string()));
        }
        Ok(predicate)
    }
}

/// Strings named by a `where` condition: a value, a list, or `{in: [..]}`.
fn string_values(condition: Option<&Value>) -> Vec<String> {
    let values = match condition {
        Some(Value::String(value)) => return vec![value.clone()],
        Some(Value::Array(values)) => values,
        Some(Value::Object(ops)) => match ops.get("in").or_else(|| ops.get("inq")) {
            Some(Value::Array(values)) => values,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    values
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}
