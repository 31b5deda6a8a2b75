use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::relation::RelationDef;
use crate::errors::{SecError, SecResult};

fn default_id_name() -> String {
    "id".to_string()
}

/// Host model metadata: name, base model, relations and raw security settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDef {
    pub name: String,
    /// Parent model in the host's type hierarchy.
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default = "default_id_name")]
    pub id_name: String,
    #[serde(default)]
    pub relations: BTreeMap<String, RelationDef>,
    /// Declarative `{roles, actions, permissions}` settings, still unvalidated.
    #[serde(default, alias = "sec")]
    pub security: Option<Value>,
}

impl ModelDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            id_name: default_id_name(),
            relations: BTreeMap::new(),
            security: None,
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn with_relation(mut self, name: impl Into<String>, relation: RelationDef) -> Self {
        self.relations.insert(name.into(), relation);
        self
    }

    pub fn with_security(mut self, settings: Value) -> Self {
        self.security = Some(settings);
        self
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.get(name)
    }
}

/// All models known to the host, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelDef>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model: ModelDef) {
        self.models.insert(model.name.clone(), model);
    }

    pub fn with(mut self, model: ModelDef) -> Self {
        self.register(model);
        self
    }

    pub fn from_json_str(text: &str) -> SecResult<Self> {
        let de = &mut serde_json::Deserializer::from_str(text);
        let models: Vec<ModelDef> = serde_path_to_error::deserialize(de).map_err(|err| {
            SecError::configuration(format!("invalid model definitions at {}: {}", err.path(), err.inner()))
        })?;

        let mut registry = Self::new();
        for model in models {
            registry.register(model);
        }
        registry.validate()?;
        Ok(registry)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SecResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            SecError::configuration(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Every base model and non-polymorphic relation target must be registered.
    pub fn validate(&self) -> SecResult<()> {
        for model in self.models.values() {
            if let Some(base) = &model.base {
                self.get(base)?;
            }
            for relation in model.relations.values() {
                if relation.polymorphic.is_some() {
                    continue;
                }
                if let Some(target) = relation.related_model() {
                    self.get(target)?;
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> SecResult<&ModelDef> {
        self.models.get(name).ok_or_else(|| SecError::unknown_model(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDef> {
        self.models.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// True when `model` is `ancestor` or derives from it.
    pub fn is_a(&self, model: &str, ancestor: &str) -> bool {
        let mut current = Some(model);
        // Bounded by the registry size so a cyclic `base` chain cannot spin.
        for _ in 0..=self.models.len() {
            match current {
                Some(name) if name == ancestor => return true,
                Some(name) => current = self.models.get(name).and_then(|m| m.base.as_deref()),
                None => return false,
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_type_hierarchy() {
        let registry = ModelRegistry::new()
            .with(ModelDef::new("Team"))
            .with(ModelDef::new("SalesTeam").with_base("Team"))
            .with(ModelDef::new("Region").with_base("SalesTeam"));

        assert!(registry.is_a("Region", "Team"));
        assert!(registry.is_a("Team", "Team"));
        assert!(!registry.is_a("Team", "Region"));
        assert!(!registry.is_a("Ghost", "Team"));
    }

    #[test]
    fn loads_definitions_from_json() {
        let registry = ModelRegistry::from_json_str(
            r#"[
                {"name": "Store"},
                {"name": "Invoice", "relations": {"store": {"type": "belongsTo", "model": "Store"}}}
            ]"#,
        )
        .unwrap();

        let invoice = registry.get("Invoice").unwrap();
        assert_eq!(invoice.id_name, "id");
        assert_eq!(invoice.relation("store").unwrap().related_model(), Some("Store"));
    }

    #[test]
    fn rejects_unknown_relation_target() {
        let err = ModelRegistry::from_json_str(
            r#"[{"name": "Invoice", "relations": {"store": {"type": "belongsTo", "model": "Store"}}}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, SecError::UnknownModel(ref name) if name == "Store"));
    }
}
