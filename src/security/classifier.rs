use std::collections::BTreeMap;

use crate::config::SecurityOptions;
use crate::errors::{SecError, SecResult};
use crate::models::{GroupRelation, ModelDef, ModelRegistry, RelationKind};

use super::profile::ModelKind;

/// True if `model`, or any ancestor in its type hierarchy, is a configured group.
pub fn is_group_model(registry: &ModelRegistry, options: &SecurityOptions, model: &str) -> bool {
    options.groups.iter().any(|group| registry.is_a(model, group))
}

/// The relation through which `model` belongs to a group, if it has one.
///
/// Qualifies when the configured relation is a `belongsTo` whose target (or
/// `through` model) is a group model, or a polymorphic `belongsTo`.
pub fn group_relation(
    registry: &ModelRegistry,
    options: &SecurityOptions,
    model: &ModelDef,
) -> Option<GroupRelation> {
    let rel_name = options.resource_options(&model.name).rel?;
    let relation = model.relation(&rel_name)?;

    if relation.kind != RelationKind::BelongsTo {
        return None;
    }

    let targets_group = relation
        .related_model()
        .map(|target| is_group_model(registry, options, target))
        .unwrap_or(false);

    if targets_group || relation.polymorphic.is_some() {
        Some(GroupRelation::from_relation(&rel_name, relation))
    } else {
        None
    }
}

/// Classify every registered model exactly once.
///
/// Fails when a configured group or resource model is not registered, or
/// when a model explicitly configured as a resource has no group relation.
pub fn classify(registry: &ModelRegistry, options: &SecurityOptions) -> SecResult<BTreeMap<String, ModelKind>> {
    for group in &options.groups {
        registry.get(group)?;
    }

    let mut kinds = BTreeMap::new();
    for model in registry.iter() {
        let kind = if is_group_model(registry, options, &model.name) {
            ModelKind::Group
        } else if let Some(relation) = group_relation(registry, options, model) {
            ModelKind::Resource { relation }
        } else {
            ModelKind::Unsecured
        };
        tracing::debug!(model = %model.name, kind = ?kind, "classified model");
        kinds.insert(model.name.clone(), kind);
    }

    for name in options.resources.keys() {
        match kinds.get(name) {
            None => return Err(SecError::unknown_model(name.clone())),
            Some(ModelKind::Unsecured) => {
                let rel = options.resource_options(name).rel.unwrap_or_default();
                return Err(SecError::configuration(format!(
                    "model {name} has no relation {rel:?} to a group"
                )));
            }
            Some(_) => {}
        }
    }

    Ok(kinds)
}
