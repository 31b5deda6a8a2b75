use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The authenticated caller, identified by user id only. Roles are never
/// cached here; they are expanded per decision from the policy store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal {
    pub user_id: String,
}

impl Principal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.user_id
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_id)
    }
}

/// Caller-supplied switches for a single operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessOptions {
    /// `false` turns off every check for this call.
    pub secure: bool,
    /// Internal lookup; access checks are suppressed.
    pub skip_access: bool,
    /// Keep access checks but do not rewrite list/count filters.
    pub skip_group_filter: bool,
    /// Row filtering applies only to calls that opted into it.
    pub scoped: bool,
    /// Creator roles for a group created by this call, overriding the
    /// configured defaults.
    pub creator_roles: Option<Vec<String>>,
}

impl Default for AccessOptions {
    fn default() -> Self {
        Self {
            secure: true,
            skip_access: false,
            skip_group_filter: false,
            scoped: false,
            creator_roles: None,
        }
    }
}

impl AccessOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options of a call that opted into row-level filtering.
    pub fn scoped() -> Self {
        Self {
            scoped: true,
            ..Self::default()
        }
    }

    pub fn with_creator_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.creator_roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    pub fn skip_group_filter(mut self) -> Self {
        self.skip_group_filter = true;
        self
    }

    pub fn insecure() -> Self {
        Self {
            secure: false,
            ..Self::default()
        }
    }

    pub fn bypasses_access(&self) -> bool {
        !self.secure || self.skip_access
    }

    pub fn bypasses_group_filter(&self) -> bool {
        self.bypasses_access() || self.skip_group_filter
    }
}

/// One invocation to authorize.
#[derive(Debug, Clone, Default)]
pub struct AccessRequest {
    pub principal: Option<Principal>,
    pub model: String,
    pub method: String,
    pub instance_id: Option<String>,
    pub payload: Option<Value>,
    pub options: AccessOptions,
}

impl AccessRequest {
    pub fn new(model: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            method: method.into(),
            ..Self::default()
        }
    }

    pub fn with_principal(mut self, principal: impl Into<Principal>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_options(mut self, options: AccessOptions) -> Self {
        self.options = options;
        self
    }
}

impl From<&str> for Principal {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Principal {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_options_are_secure_and_unscoped() {
        let options = AccessOptions::default();
        assert!(!options.bypasses_access());
        assert!(!options.bypasses_group_filter());
        assert!(!options.scoped);

        assert!(AccessOptions::insecure().bypasses_group_filter());
        assert!(AccessOptions::scoped().skip_group_filter().bypasses_group_filter());
    }

    #[test]
    fn options_deserialize_from_camel_case() {
        let options: AccessOptions =
            serde_json::from_value(json!({"skipGroupFilter": true, "creatorRoles": ["admin"]})).unwrap();
        assert!(options.secure);
        assert!(options.skip_group_filter);
        assert_eq!(options.creator_roles, Some(vec!["admin".to_string()]));
    }

    #[test]
    fn request_builder_sets_fields() {
        let request = AccessRequest::new("Invoice", "findById")
            .with_principal("u1")
            .with_id("7")
            .with_payload(json!({"storeId": "A"}));

        assert_eq!(request.principal, Some(Principal::new("u1")));
        assert_eq!(request.instance_id.as_deref(), Some("7"));
        assert_eq!(request.payload, Some(json!({"storeId": "A"})));
    }
}
