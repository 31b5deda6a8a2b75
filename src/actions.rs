//! Action taxonomy - primitive data operations mapped to semantic actions.
//!
//! Action keys are always stored upper-cased, so every comparison between a
//! declared, merged or requested action is case-insensitive by construction.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const READ: &str = "read";
pub const WRITE: &str = "write";
pub const DELETE: &str = "delete";
pub const MANAGE: &str = "manage";

/// Grants every action defined for the target when it appears in a permission list.
pub const WILDCARD: &str = "*";

/// Built-in method table. Removal methods map to `delete`, not `manage`.
pub const ACTIONS_TO_METHODS: &[(&str, &[&str])] = &[
    (READ, &["exists", "get", "find", "findById", "findOne", "count"]),
    (
        WRITE,
        &[
            "create",
            "updateOrCreate",
            "upsertWithWhere",
            "upsert",
            "patchOrCreate",
            "patchAttributes",
        ],
    ),
    (DELETE, &["destroyById", "deleteById", "removeById"]),
    (MANAGE, &[]),
];

/// Upper-cased permission token, optionally namespaced as `RESOURCE:ACTION`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionKey(String);

impl ActionKey {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().to_uppercase())
    }

    /// `Invoice` + `read` -> `INVOICE:READ`
    pub fn namespaced(resource: &str, action: impl AsRef<str>) -> Self {
        Self::new(format!("{}:{}", resource, action.as_ref()))
    }

    pub fn wildcard() -> Self {
        Self(WILDCARD.to_string())
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The resource prefix of a namespaced key, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once(':').map(|(ns, _)| ns)
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ActionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActionKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ActionKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl Serialize for ActionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ActionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}

/// Built-in action for a primitive method name, if the method is mapped.
pub fn builtin_action(method: &str) -> Option<&'static str> {
    ACTIONS_TO_METHODS
        .iter()
        .find(|(_, methods)| methods.contains(&method))
        .map(|(action, _)| *action)
}

/// Resolve a method to its action key, falling back to `default` when unmapped.
pub fn from_method(method: &str, default: &str) -> ActionKey {
    ActionKey::new(builtin_action(method).unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_primitive_methods() {
        let expected = [
            ("count", "READ"),
            ("create", "WRITE"),
            ("deleteById", "DELETE"),
            ("destroyById", "DELETE"),
            ("exists", "READ"),
            ("find", "READ"),
            ("findById", "READ"),
            ("findOne", "READ"),
            ("get", "READ"),
            ("patchAttributes", "WRITE"),
            ("patchOrCreate", "WRITE"),
            ("removeById", "DELETE"),
            ("updateOrCreate", "WRITE"),
            ("upsert", "WRITE"),
            ("upsertWithWhere", "WRITE"),
        ];
        for (method, action) in expected {
            assert_eq!(from_method(method, MANAGE).as_str(), action, "method {method}");
        }
    }

    #[test]
    fn unmapped_method_falls_back_to_default() {
        assert_eq!(from_method("replaceById", MANAGE), ActionKey::new("MANAGE"));
        assert_eq!(from_method("edit", WRITE), ActionKey::new("write"));
    }

    #[test]
    fn keys_compare_case_insensitively() {
        assert_eq!(ActionKey::new("Read"), ActionKey::new("READ"));
        assert_eq!(ActionKey::namespaced("Invoice", "read").as_str(), "INVOICE:READ");
        assert_eq!(ActionKey::namespaced("Invoice", "read").namespace(), Some("INVOICE"));
        assert!(ActionKey::new("*").is_wildcard());
    }

    #[test]
    fn deserializes_upper_cased() {
        let keys: Vec<ActionKey> = serde_json::from_str(r#"["read", "Store:Write"]"#).unwrap();
        assert_eq!(keys, vec![ActionKey::new("READ"), ActionKey::new("STORE:WRITE")]);
    }
}
