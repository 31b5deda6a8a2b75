//! Security settings compiler.
//!
//! Turns each model's declarative `{roles, actions, permissions}` into a
//! [`SecurityProfile`], then merges resource policy into every group's roles.
//! Every model is transformed before any group is merged, since the merge
//! copies the resources' already-normalized action keys.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::actions::ActionKey;
use crate::config::SecurityOptions;
use crate::errors::{SecError, SecResult};
use crate::models::{ModelDef, ModelRegistry};

use super::classifier;
use super::profile::{expand_wildcard, ActionDef, ModelKind, RoleDef, SecurityPolicy, SecurityProfile};

const DEPRECATED_PERMISSIONS_KEY: &str = "default-permissions";

/// Classify, transform and merge every registered model.
pub fn compile(registry: &ModelRegistry, options: SecurityOptions) -> SecResult<SecurityPolicy> {
    let kinds = classifier::classify(registry, &options)?;

    let mut profiles = BTreeMap::new();
    for model in registry.iter() {
        let kind = kinds.get(&model.name).cloned().unwrap_or(ModelKind::Unsecured);
        if kind == ModelKind::Unsecured {
            continue;
        }
        let profile = transform(model, kind, &options)?;
        profiles.insert(model.name.clone(), profile);
    }

    let resources: Vec<SecurityProfile> = profiles
        .values()
        .filter(|p| p.group_relation().is_some())
        .cloned()
        .collect();

    for profile in profiles.values_mut().filter(|p| p.is_group()) {
        build_group_roles(profile, &resources);
    }

    tracing::info!(
        groups = profiles.values().filter(|p| p.is_group()).count(),
        resources = resources.len(),
        "compiled security profiles"
    );

    Ok(SecurityPolicy::new(profiles, options))
}

/// Normalize one model's declarative settings.
pub fn transform(model: &ModelDef, kind: ModelKind, options: &SecurityOptions) -> SecResult<SecurityProfile> {
    let empty = Map::new();
    let settings = match &model.security {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(SecError::configuration(format!(
                "security settings of model {} must be an object",
                model.name
            )))
        }
    };

    let is_group = kind.is_group();
    let resource_options = options.resource_options(&model.name);

    let mut profile = SecurityProfile::new(model.name.clone(), kind);
    profile.rowlevel = if is_group {
        options.resources.get(&model.name).map(|o| o.rowlevel).unwrap_or(true)
    } else {
        resource_options.rowlevel
    };
    profile.polymorphic_types = resource_options.polymorphic_types;

    let mut permissions = settings.get("permissions").filter(|v| !v.is_null()).cloned();
    if permissions.is_none() {
        if let Some(deprecated) = settings.get(DEPRECATED_PERMISSIONS_KEY) {
            tracing::warn!(
                model = %model.name,
                "\"default-permissions\" has been deprecated, using \"permissions\" instead"
            );
            permissions = Some(deprecated.clone());
        }
    }

    let mut actions = settings.get("actions").filter(|v| !v.is_null()).cloned();
    if !is_group {
        if actions.is_none() {
            actions = Some(Value::from(options.default_actions.clone()));
        }
        if permissions.is_none() {
            let defaults: Map<String, Value> = options
                .default_permissions
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            permissions = Some(Value::Object(defaults));
        }
    }

    if let Some(roles) = settings.get("roles").filter(|v| !v.is_null()) {
        profile.roles = normalize_roles(&model.name, roles)?;
    }
    if let Some(actions) = actions {
        profile.actions = normalize_actions(&model.name, &actions)?;
    }
    if let Some(permissions) = permissions {
        profile.permissions = normalize_permissions(&model.name, &permissions)?;
    }

    Ok(profile)
}

/// Merge resource actions and permissions into a group's action map and roles.
///
/// Resource actions are copied as `RESOURCE:ACTION`; each group role named in
/// a resource's permissions gains the namespaced keys, with the wildcard
/// expanded to the resource's action keys at this point.
pub fn build_group_roles(group: &mut SecurityProfile, resources: &[SecurityProfile]) {
    for resource in resources {
        if resource.model == group.model {
            continue;
        }

        // Method mappings stay with the resource; the group only carries the keys.
        for (key, action) in &resource.actions {
            let namespaced = ActionKey::namespaced(&resource.model, key);
            group.actions.insert(
                namespaced.clone(),
                ActionDef {
                    name: namespaced,
                    title: action.title.clone(),
                    methods: Vec::new(),
                },
            );
        }

        if resource.permissions.is_empty() {
            continue;
        }

        for role in group.roles.values_mut() {
            let Some(permitted) = resource.permissions.get(&role.name) else {
                continue;
            };
            let permitted = expand_wildcard(permitted, resource.action_keys());
            role.actions
                .extend(permitted.iter().map(|action| ActionKey::namespaced(&resource.model, action)));
            tracing::debug!(
                group = %group.model,
                resource = %resource.model,
                role = %role.name,
                actions = ?role.actions,
                "merged resource permissions into role"
            );
        }
    }
}

fn invalid(model: &str, property: &str, key: &str) -> SecError {
    SecError::configuration(format!(
        "Invalid settings for model {model} security settings {property}.{key}"
    ))
}

fn expect_map<'a>(model: &str, property: &str, value: &'a Value) -> SecResult<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        SecError::configuration(format!(
            "Invalid settings for model {model} security settings {property}: expected an object"
        ))
    })
}

/// Coerce `null`, a string or an array of strings into a list.
fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    match value {
        None | Some(Value::Null) => Some(Vec::new()),
        Some(Value::String(s)) => Some(vec![s.clone()]),
        Some(Value::Array(items)) => items.iter().map(|v| v.as_str().map(str::to_string)).collect(),
        Some(_) => None,
    }
}

fn title_of(value: &Map<String, Value>) -> Option<String> {
    value.get("title").and_then(Value::as_str).map(str::to_string)
}

fn normalize_roles(model: &str, roles: &Value) -> SecResult<BTreeMap<String, RoleDef>> {
    let mut result = BTreeMap::new();
    for (name, value) in expect_map(model, "roles", roles)? {
        let role = match value {
            Value::String(title) => RoleDef {
                name: name.clone(),
                title: Some(title.clone()),
                actions: Vec::new(),
                inherits: Vec::new(),
            },
            Value::Object(def) => RoleDef {
                name: name.clone(),
                title: title_of(def),
                actions: string_list(def.get("actions"))
                    .ok_or_else(|| invalid(model, "roles", name))?
                    .into_iter()
                    .map(ActionKey::new)
                    .collect(),
                inherits: string_list(def.get("inherits")).ok_or_else(|| invalid(model, "roles", name))?,
            },
            _ => return Err(invalid(model, "roles", name)),
        };
        result.insert(name.clone(), role);
    }
    Ok(result)
}

fn normalize_actions(model: &str, actions: &Value) -> SecResult<BTreeMap<ActionKey, ActionDef>> {
    // An array of names is an identity mapping name -> name.
    let identity;
    let entries = match actions {
        Value::Array(names) => {
            let mut map = Map::new();
            for name in names {
                let name = name
                    .as_str()
                    .ok_or_else(|| invalid(model, "actions", &name.to_string()))?;
                map.insert(name.to_string(), Value::from(name));
            }
            identity = map;
            &identity
        }
        other => expect_map(model, "actions", other)?,
    };

    let mut result = BTreeMap::new();
    for (name, value) in entries {
        let key = ActionKey::new(name);
        let action = match value {
            Value::String(title) => ActionDef {
                name: key.clone(),
                title: Some(title.clone()),
                methods: Vec::new(),
            },
            Value::Object(def) => ActionDef {
                name: key.clone(),
                title: title_of(def),
                methods: string_list(def.get("methods")).ok_or_else(|| invalid(model, "actions", name))?,
            },
            _ => return Err(invalid(model, "actions", name)),
        };
        result.insert(key, action);
    }
    Ok(result)
}

fn normalize_permissions(model: &str, permissions: &Value) -> SecResult<BTreeMap<String, Vec<ActionKey>>> {
    let mut result = BTreeMap::new();
    for (role, value) in expect_map(model, "permissions", permissions)? {
        let actions = string_list(Some(value)).ok_or_else(|| invalid(model, "permissions", role))?;
        result.insert(role.clone(), actions.into_iter().map(ActionKey::new).collect());
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(raw: &[&str]) -> Vec<ActionKey> {
        raw.iter().map(ActionKey::new).collect()
    }

    #[test]
    fn string_entries_become_titles() {
        let model = ModelDef::new("Store").with_security(json!({
            "roles": {
                "member": "Member",
                "manager": {"title": "Manager", "actions": ["read", "write"], "inherits": "member"}
            },
            "actions": ["read", "write"]
        }));
        let profile = transform(&model, ModelKind::Group, &SecurityOptions::default()).unwrap();

        assert_eq!(profile.roles["member"].title.as_deref(), Some("Member"));
        assert!(profile.roles["member"].actions.is_empty());
        assert_eq!(profile.roles["manager"].actions, keys(&["READ", "WRITE"]));
        assert_eq!(profile.roles["manager"].inherits, vec!["member"]);
        assert_eq!(profile.actions[&ActionKey::new("read")].title.as_deref(), Some("read"));
        // Groups get no default permissions.
        assert!(profile.permissions.is_empty());
    }

    #[test]
    fn non_group_models_fall_back_to_defaults() {
        let model = ModelDef::new("Invoice");
        let relation = crate::models::GroupRelation::from_relation(
            "store",
            &crate::models::RelationDef::belongs_to("Store"),
        );
        let profile = transform(&model, ModelKind::Resource { relation }, &SecurityOptions::default()).unwrap();

        assert_eq!(
            profile.action_keys().cloned().collect::<Vec<_>>(),
            keys(&["DELETE", "MANAGE", "READ", "WRITE"])
        );
        assert_eq!(profile.permissions["member"], keys(&["READ"]));
        assert_eq!(profile.permissions["manager"], keys(&["WRITE", "MANAGE"]));
        assert_eq!(profile.permissions["admin"], keys(&["*"]));
    }

    #[test]
    fn honors_deprecated_permissions_alias() {
        let model = ModelDef::new("Store").with_security(json!({
            "default-permissions": {"member": "read"}
        }));
        let profile = transform(&model, ModelKind::Group, &SecurityOptions::default()).unwrap();
        assert_eq!(profile.permissions["member"], keys(&["READ"]));

        // `permissions` wins when both are present.
        let model = ModelDef::new("Store").with_security(json!({
            "permissions": {"member": ["write"]},
            "default-permissions": {"member": "read"}
        }));
        let profile = transform(&model, ModelKind::Group, &SecurityOptions::default()).unwrap();
        assert_eq!(profile.permissions["member"], keys(&["WRITE"]));
    }

    #[test]
    fn malformed_entries_fail_fast() {
        for settings in [
            json!({"roles": {"member": 42}}),
            json!({"roles": ["member"]}),
            json!({"actions": {"read": true}}),
            json!({"actions": [1, 2]}),
            json!({"permissions": {"member": {"read": true}}}),
            json!("not an object"),
        ] {
            let model = ModelDef::new("Store").with_security(settings.clone());
            let err = transform(&model, ModelKind::Group, &SecurityOptions::default()).unwrap_err();
            assert!(err.is_configuration(), "{settings} -> {err}");
        }
    }

    #[test]
    fn merge_namespaces_resource_actions() {
        let store = ModelDef::new("Store").with_security(json!({
            "roles": {"member": {"actions": ["read"]}, "admin": {}},
            "actions": ["read"]
        }));
        let mut group = transform(&store, ModelKind::Group, &SecurityOptions::default()).unwrap();

        let relation = crate::models::GroupRelation::from_relation(
            "store",
            &crate::models::RelationDef::belongs_to("Store"),
        );
        let invoice = ModelDef::new("Invoice").with_security(json!({
            "actions": ["read", "write"],
            "permissions": {"member": "read", "admin": "*"}
        }));
        let resource = transform(&invoice, ModelKind::Resource { relation }, &SecurityOptions::default()).unwrap();

        build_group_roles(&mut group, &[resource]);

        assert!(group.actions.contains_key(&ActionKey::new("INVOICE:READ")));
        assert!(group.actions.contains_key(&ActionKey::new("INVOICE:WRITE")));
        assert_eq!(group.actions[&ActionKey::new("INVOICE:WRITE")].name.as_str(), "INVOICE:WRITE");
        assert_eq!(group.roles["member"].actions, keys(&["READ", "INVOICE:READ"]));
        assert_eq!(group.roles["admin"].actions, keys(&["INVOICE:READ", "INVOICE:WRITE"]));
    }
}
