use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    HasManyThrough,
    HasAndBelongsToMany,
    ReferencesMany,
    EmbedsOne,
    EmbedsMany,
}

/// Discriminator/foreign-key pair of a polymorphic relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Polymorphic {
    pub discriminator: String,
    pub foreign_key: String,
}

impl<'de> Deserialize<'de> for Polymorphic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Full {
            discriminator: String,
            foreign_key: String,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            // `"polymorphic": "owner"` means `ownerType` + `ownerId`
            Named(String),
            Full(Full),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Named(name) => Polymorphic {
                discriminator: format!("{name}Type"),
                foreign_key: format!("{name}Id"),
            },
            Raw::Full(full) => Polymorphic {
                discriminator: full.discriminator,
                foreign_key: full.foreign_key,
            },
        })
    }
}

/// Declared relation of a model, as exposed by the host model layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDef {
    #[serde(rename = "type")]
    pub kind: RelationKind,
    /// Target model; absent for polymorphic `belongsTo`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub through: Option<String>,
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub polymorphic: Option<Polymorphic>,
}

impl RelationDef {
    pub fn belongs_to(model: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::BelongsTo,
            model: Some(model.into()),
            through: None,
            foreign_key: None,
            polymorphic: None,
        }
    }

    pub fn belongs_to_polymorphic(discriminator: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::BelongsTo,
            model: None,
            through: None,
            foreign_key: None,
            polymorphic: Some(Polymorphic {
                discriminator: discriminator.into(),
                foreign_key: foreign_key.into(),
            }),
        }
    }

    pub fn has_many(model: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::HasMany,
            model: Some(model.into()),
            through: None,
            foreign_key: None,
            polymorphic: None,
        }
    }

    pub fn with_foreign_key(mut self, key: impl Into<String>) -> Self {
        self.foreign_key = Some(key.into());
        self
    }

    /// The model the relation ultimately points at (`through` wins).
    pub fn related_model(&self) -> Option<&str> {
        self.through.as_deref().or(self.model.as_deref())
    }
}

/// How a resource instance references its owning group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRelation {
    pub relation_name: String,
    /// Field holding the group id on the resource instance.
    pub foreign_key: String,
    /// Fixed group type; `None` when polymorphic.
    pub target_type: Option<String>,
    /// Field holding the group type; `Some` only when polymorphic.
    pub discriminator: Option<String>,
}

impl GroupRelation {
    pub fn from_relation(name: &str, relation: &RelationDef) -> Self {
        match &relation.polymorphic {
            Some(poly) => Self {
                relation_name: name.to_string(),
                foreign_key: poly.foreign_key.clone(),
                target_type: None,
                discriminator: Some(poly.discriminator.clone()),
            },
            None => Self {
                relation_name: name.to_string(),
                foreign_key: relation
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{name}Id")),
                target_type: relation.related_model().map(str::to_string),
                discriminator: None,
            },
        }
    }

    pub fn is_polymorphic(&self) -> bool {
        self.discriminator.is_some()
    }

    /// Extract the referenced group from instance or payload data.
    ///
    /// Polymorphic relations read the discriminator and foreign key, and also
    /// accept `"Type:id"` or `{type, id}` under the relation name. Returns
    /// `None` when no group type can be read.
    pub fn group_in(&self, data: &Value) -> Option<PartialGroupRef> {
        let obj = data.as_object()?;

        let (model, id) = match &self.discriminator {
            Some(discriminator) => {
                let mut model = obj.get(discriminator).and_then(Value::as_str).map(str::to_string);
                let mut id = obj.get(&self.foreign_key).and_then(id_string);

                if model.is_none() {
                    match obj.get(&self.relation_name) {
                        Some(Value::String(packed)) => {
                            // `Type:id`; segments past the id are ignored.
                            let mut parts = packed.split(':');
                            model = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
                            id = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
                        }
                        Some(Value::Object(nested)) => {
                            model = nested.get("type").and_then(Value::as_str).map(str::to_string);
                            id = nested.get("id").and_then(id_string);
                        }
                        _ => {}
                    }
                }
                (model, id)
            }
            None => (self.target_type.clone(), obj.get(&self.foreign_key).and_then(id_string)),
        };

        model.map(|model| PartialGroupRef { model, id })
    }
}

/// A group reference read from data, whose id may still be missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialGroupRef {
    pub model: String,
    pub id: Option<String>,
}

impl PartialGroupRef {
    pub fn complete(self) -> Option<GroupRef> {
        let id = self.id?;
        Some(GroupRef { model: self.model, id })
    }
}

/// A concrete group instance: model type plus instance id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupRef {
    #[serde(rename = "type")]
    pub model: String,
    pub id: String,
}

impl GroupRef {
    pub fn new(model: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            id: id.into(),
        }
    }
}

/// Any model instance addressed by type and id; grants target these.
pub type EntityRef = GroupRef;

impl fmt::Display for GroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model, self.id)
    }
}

/// Instance ids arrive as strings or numbers; both compare as strings.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
