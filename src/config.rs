//! Process-wide security options.
//!
//! Options are read from a JSON file (`GSEC_CONFIG`) with environment
//! overrides, the same way other settings in this crate come from the
//! environment.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::actions;
use crate::errors::{SecError, SecResult};

/// What to do when no owning group can be determined for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnscopedAccess {
    /// Treat the operation as group-independent and let it through.
    #[default]
    Allow,
    /// Refuse anything that cannot be tied to a group.
    Deny,
}

impl UnscopedAccess {
    pub fn parse(value: &str) -> SecResult<Self> {
        match value.trim().to_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            other => Err(SecError::configuration(format!(
                "unscoped access must be \"allow\" or \"deny\", got {other:?}"
            ))),
        }
    }
}

/// Per-resource options, normalized from a relation name, a row-level flag
/// or a full object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOptions {
    pub rel: Option<String>,
    pub rowlevel: bool,
    pub polymorphic_types: Vec<String>,
}

impl<'de> Deserialize<'de> for ResourceOptions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Full {
            rel: Option<String>,
            #[serde(default)]
            rowlevel: bool,
            #[serde(default, deserialize_with = "one_or_many")]
            polymorphic_types: Vec<String>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Rel(String),
            Rowlevel(bool),
            Full(Full),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Rel(rel) => ResourceOptions {
                rel: Some(rel),
                ..Default::default()
            },
            Raw::Rowlevel(rowlevel) => ResourceOptions {
                rowlevel,
                ..Default::default()
            },
            Raw::Full(full) => ResourceOptions {
                rel: full.rel,
                rowlevel: full.rowlevel,
                polymorphic_types: full.polymorphic_types,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityOptions {
    pub enabled: bool,
    #[serde(alias = "groupModels", deserialize_with = "one_or_many")]
    pub groups: Vec<String>,
    /// Relation name used by resources without their own `rel` option.
    pub rel: Option<String>,
    pub resources: BTreeMap<String, ResourceOptions>,
    pub user_model: String,
    pub admin_role: String,
    #[serde(deserialize_with = "one_or_many")]
    pub default_creator_roles: Vec<String>,
    pub default_actions: Vec<String>,
    pub default_permissions: BTreeMap<String, Value>,
    #[serde(deserialize_with = "one_or_many")]
    pub creator_fields: Vec<String>,
    pub unscoped_access: UnscopedAccess,
}

impl Default for SecurityOptions {
    fn default() -> Self {
        let mut default_permissions = BTreeMap::new();
        default_permissions.insert("member".to_string(), Value::from(actions::READ));
        default_permissions.insert(
            "manager".to_string(),
            Value::from(vec![actions::WRITE, actions::MANAGE]),
        );
        default_permissions.insert("admin".to_string(), Value::from(actions::WILDCARD));

        Self {
            enabled: true,
            groups: Vec::new(),
            rel: None,
            resources: BTreeMap::new(),
            user_model: "User".to_string(),
            admin_role: "admin".to_string(),
            default_creator_roles: vec!["member".to_string(), "manager".to_string()],
            default_actions: [actions::READ, actions::WRITE, actions::DELETE, actions::MANAGE]
                .iter()
                .map(|a| a.to_string())
                .collect(),
            default_permissions,
            creator_fields: vec!["userId".to_string(), "owner".to_string()],
            unscoped_access: UnscopedAccess::Allow,
        }
    }
}

impl SecurityOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rel(mut self, rel: impl Into<String>) -> Self {
        self.rel = Some(rel.into());
        self
    }

    pub fn with_resource(mut self, model: impl Into<String>, options: ResourceOptions) -> Self {
        self.resources.insert(model.into(), options);
        self
    }

    pub fn with_user_model(mut self, user_model: impl Into<String>) -> Self {
        self.user_model = user_model.into();
        self
    }

    pub fn with_unscoped_access(mut self, policy: UnscopedAccess) -> Self {
        self.unscoped_access = policy;
        self
    }

    /// Parse options from JSON text, reporting the path of a malformed value.
    pub fn from_json_str(text: &str) -> SecResult<Self> {
        let de = &mut serde_json::Deserializer::from_str(text);
        serde_path_to_error::deserialize(de).map_err(|err| {
            SecError::configuration(format!("invalid security options at {}: {}", err.path(), err.inner()))
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> SecResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            SecError::configuration(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Load from `GSEC_CONFIG` if set, then apply `GSEC_ENABLED` and
    /// `GSEC_UNSCOPED_ACCESS` overrides.
    pub fn from_env() -> SecResult<Self> {
        let mut options = match std::env::var("GSEC_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };

        if let Ok(enabled) = std::env::var("GSEC_ENABLED") {
            options.enabled = enabled
                .trim()
                .parse::<bool>()
                .map_err(|_| SecError::configuration("GSEC_ENABLED must be true or false"))?;
        }

        if let Ok(policy) = std::env::var("GSEC_UNSCOPED_ACCESS") {
            options.unscoped_access = UnscopedAccess::parse(&policy)?;
        }

        Ok(options)
    }

    /// Resource options for a model, falling back to the global relation name.
    pub fn resource_options(&self, model: &str) -> ResourceOptions {
        let mut options = self.resources.get(model).cloned().unwrap_or_default();
        if options.rel.is_none() {
            options.rel = self.rel.clone();
        }
        options
    }

    pub fn is_creator_role(&self, role: &str) -> bool {
        self.default_creator_roles.iter().any(|r| r == role)
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
        OneOrMany::Nothing(()) => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let options = SecurityOptions::default();
        assert!(options.enabled);
        assert_eq!(options.user_model, "User");
        assert_eq!(options.admin_role, "admin");
        assert_eq!(options.default_creator_roles, vec!["member", "manager"]);
        assert_eq!(options.default_actions, vec!["read", "write", "delete", "manage"]);
        assert_eq!(options.unscoped_access, UnscopedAccess::Allow);
    }

    #[test]
    fn normalizes_resource_shorthands() {
        let options = SecurityOptions::from_json_str(
            r#"{
                "groupModels": "Store",
                "rel": "store",
                "resources": {
                    "Invoice": "store",
                    "Transaction": true,
                    "Product": {"rel": "owner", "polymorphicTypes": "Store"}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(options.groups, vec!["Store"]);
        assert_eq!(options.resources["Invoice"].rel.as_deref(), Some("store"));
        assert!(!options.resources["Invoice"].rowlevel);
        assert!(options.resources["Transaction"].rowlevel);
        assert_eq!(options.resources["Product"].polymorphic_types, vec!["Store"]);

        // Falls back to the global relation name.
        assert_eq!(options.resource_options("Transaction").rel.as_deref(), Some("store"));
        assert_eq!(options.resource_options("Other").rel.as_deref(), Some("store"));
    }

    #[test]
    fn reports_path_of_malformed_option() {
        let err = SecurityOptions::from_json_str(r#"{"unscopedAccess": "maybe"}"#).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("unscopedAccess"), "{err}");
    }

    #[test]
    fn parses_unscoped_policy() {
        assert_eq!(UnscopedAccess::parse(" Deny ").unwrap(), UnscopedAccess::Deny);
        assert!(UnscopedAccess::parse("sometimes").is_err());
    }
}
