//! Default roles and grants for newly persisted group and resource instances.

use serde_json::Value;

use crate::data::InstanceSource;
use crate::errors::{SecError, SecResult};
use crate::models::{id_string, EntityRef, GroupRef, GroupRelation, ModelRegistry};
use crate::store::{MembershipState, PolicyStore, RoleRecord};

use super::profile::{ModelKind, SecurityPolicy, SecurityProfile};

/// What seeding did for one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub roles_created: Vec<RoleRecord>,
    pub creator: Option<String>,
    pub creator_roles: Vec<String>,
    /// Roles granted default actions over the new instance.
    pub roles_granted: Vec<String>,
}

pub struct Seeder<'a> {
    policy: &'a SecurityPolicy,
    registry: &'a ModelRegistry,
    store: &'a dyn PolicyStore,
    instances: &'a dyn InstanceSource,
}

impl<'a> Seeder<'a> {
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

    /// Seed a freshly created instance of `model`. `creator_roles`
    /// overrides the configured default creator roles.
    pub async fn seed(
        &self,
        model: &str,
        instance: &Value,
        creator: Option<&str>,
        creator_roles: Option<&[String]>,
    ) -> SecResult<SeedReport> {
        let profile = match self.policy.profile(model) {
            Some(profile) => profile,
            None => return Ok(SeedReport::default()),
        };

        match &profile.kind {
            ModelKind::Group => self.seed_group(profile, instance, creator, creator_roles).await,
            ModelKind::Resource { relation } => self.seed_resource(profile, relation, instance).await,
            ModelKind::Unsecured => Ok(SeedReport::default()),
        }
    }

    fn instance_ref(&self, model: &str, instance: &Value) -> SecResult<EntityRef> {
        let id_name = &self.registry.get(model)?.id_name;
        let id = instance
            .get(id_name)
            .and_then(id_string)
            .ok_or_else(|| SecError::data_source(format!("saved {model} instance has no {id_name}")))?;
        Ok(EntityRef::new(model, id))
    }

    /// Create the group's declared roles scoped to the new instance, wire
    /// their inheritance, grant their default actions on the instance and
    /// enroll the creator.
    pub async fn seed_group(
        &self,
        profile: &SecurityProfile,
        instance: &Value,
        creator: Option<&str>,
        creator_roles: Option<&[String]>,
    ) -> SecResult<SeedReport> {
        let group = self.instance_ref(&profile.model, instance)?;
        let mut report = SeedReport::default();

        for def in profile.roles.values() {
            let role = self.store.create_role(Some(&group), &def.name).await?;
            report.roles_created.push(role);
        }

        for role in &report.roles_created {
            if let Some(def) = profile.roles.get(&role.name).filter(|def| !def.inherits.is_empty()) {
                self.store.inherit_role_from(role, &def.inherits).await?;
            }

            let grants = profile.default_grants(&role.name);
            if !grants.is_empty() {
                self.store.allow(role, &group, &grants).await?;
                report.roles_granted.push(role.name.clone());
            }
        }

        tracing::debug!(group = %group, roles = report.roles_created.len(), "seeded group roles");

        let creator = creator
            .map(str::to_string)
            .or_else(|| self.creator_from_fields(instance));
        let Some(creator) = creator else {
            tracing::debug!(group = %group, "no creator known, skipping creator roles");
            return Ok(report);
        };

        let options = self.policy.options();
        let is_creator_role = |name: &str| match creator_roles {
            Some(roles) => roles.iter().any(|r| r == name),
            None => options.is_creator_role(name),
        };
        let roles: Vec<RoleRecord> = report
            .roles_created
            .iter()
            .filter(|role| is_creator_role(&role.name))
            .cloned()
            .collect();

        if !roles.is_empty() {
            self.store
                .assign_memberships(&creator, &roles, MembershipState::Active)
                .await?;
            tracing::debug!(
                group = %group,
                user_id = %creator,
                roles = ?roles.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
                "assigned creator roles"
            );
        }

        report.creator_roles = roles.into_iter().map(|r| r.name).collect();
        report.creator = Some(creator);
        Ok(report)
    }

    fn creator_from_fields(&self, instance: &Value) -> Option<String> {
        self.policy
            .options()
            .creator_fields
            .iter()
            .find_map(|field| instance.get(field).and_then(id_string))
    }

    /// Grant the owning group's live roles the resource's permitted actions
    /// over the new instance. An owning group that cannot be resolved means
    /// there is nothing to seed.
    pub async fn seed_resource(
        &self,
        profile: &SecurityProfile,
        relation: &GroupRelation,
        instance: &Value,
    ) -> SecResult<SeedReport> {
        let entity = self.instance_ref(&profile.model, instance)?;
        let mut report = SeedReport::default();

        let group = match self.owning_group(relation, instance).await? {
            Some(group) => group,
            None => {
                tracing::debug!(instance = %entity, "no owning group found, nothing to seed");
                return Ok(report);
            }
        };

        let names = profile.seeded_role_names();
        let roles = self.store.find_roles(&group, Some(&names)).await?;
        if roles.is_empty() {
            tracing::debug!(group = %group, roles = ?names, "no live roles to grant");
        }

        for role in roles {
            let grants = profile.default_grants(&role.name);
            if grants.is_empty() {
                continue;
            }
            tracing::debug!(
                group = %group,
                role = %role.name,
                instance = %entity,
                actions = ?grants,
                "granting default permissions"
            );
            self.store.allow(&role, &entity, &grants).await?;
            report.roles_granted.push(role.name);
        }

        Ok(report)
    }

    async fn owning_group(&self, relation: &GroupRelation, instance: &Value) -> SecResult<Option<GroupRef>> {
        let group = match relation.group_in(instance).and_then(|partial| partial.complete()) {
            Some(group) => group,
            None => return Ok(None),
        };
        if !self.registry.contains(&group.model) {
            tracing::debug!(group = %group, "polymorphic group type is not registered");
            return Ok(None);
        }
        let found = self.instances.find_by_id(&group.model, &group.id).await?;
        Ok(found.map(|_| group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionKey;
    use crate::config::SecurityOptions;
    use crate::data::MemoryInstances;
    use crate::models::{ModelDef, RelationDef};
    use crate::security::compile;
    use crate::store::MemoryPolicyStore;
    use async_trait::async_trait;
    use serde_json::json;

    fn registry() -> ModelRegistry {
        ModelRegistry::new()
            .with(ModelDef::new("User"))
            .with(ModelDef::new("Store").with_security(json!({
                "roles": {
                    "member": {"title": "Member", "actions": ["read"]},
                    "manager": {"title": "Manager", "actions": ["write"], "inherits": "member"}
                }
            })))
            .with(
                ModelDef::new("Product")
                    .with_relation("owner", RelationDef::belongs_to_polymorphic("ownerType", "ownerId")),
            )
    }

    fn policy(registry: &ModelRegistry) -> SecurityPolicy {
        let options = SecurityOptions::from_json_str(
            r#"{"groups": "Store", "resources": {"Product": {"rel": "owner", "polymorphicTypes": ["Store", "User"]}}}"#,
        )
        .unwrap();
        compile(registry, options).unwrap()
    }

    struct FailingInstances;

    #[async_trait]
    impl InstanceSource for FailingInstances {
        async fn find_by_id(&self, _model: &str, _id: &str) -> SecResult<Option<Value>> {
            Err(SecError::data_source("instance lookup unavailable"))
        }
    }

    #[tokio::test]
    async fn polymorphic_store_owner_gets_role_grants() {
        let registry = registry();
        let policy = policy(&registry);
        let store = MemoryPolicyStore::new();
        let instances = MemoryInstances::new();
        let seeder = Seeder::new(&policy, &registry, &store, &instances);

        let shop = json!({"id": "A"});
        instances.insert("Store", shop.clone()).await.unwrap();
        let report = seeder.seed("Store", &shop, Some("u1"), None).await.unwrap();
        assert_eq!(report.creator.as_deref(), Some("u1"));
        assert_eq!(report.roles_created.len(), 2);

        let product = json!({"id": "p1", "ownerType": "Store", "ownerId": "A"});
        let mut report = seeder.seed("Product", &product, Some("u1"), None).await.unwrap();
        report.roles_granted.sort();
        assert_eq!(report.roles_granted, vec!["manager", "member"]);

        let roles = store.find_roles(&EntityRef::new("Store", "A"), None).await.unwrap();
        let role = |name: &str| roles.iter().find(|r| r.name == name).cloned().unwrap();
        let entity = EntityRef::new("Product", "p1");
        assert_eq!(store.granted_actions(&role("member"), &entity).await, vec![ActionKey::new("READ")]);
        assert_eq!(
            store.granted_actions(&role("manager"), &entity).await,
            vec![ActionKey::new("MANAGE"), ActionKey::new("WRITE")]
        );
    }

    #[tokio::test]
    async fn unresolvable_owner_is_skipped() {
        let registry = registry();
        let policy = policy(&registry);
        let store = MemoryPolicyStore::new();
        let instances = MemoryInstances::new();
        let seeder = Seeder::new(&policy, &registry, &store, &instances);

        for product in [
            json!({"id": "p1", "ownerType": "Store", "ownerId": "missing"}),
            json!({"id": "p2", "ownerType": "Ghost", "ownerId": "1"}),
            json!({"id": "p3", "ownerType": "Store"}),
            json!({"id": "p4"}),
        ] {
            let report = seeder.seed("Product", &product, Some("u1"), None).await.unwrap();
            assert_eq!(report, SeedReport::default(), "{product}");
        }
    }

    #[tokio::test]
    async fn lookup_failures_propagate() {
        let registry = registry();
        let policy = policy(&registry);
        let store = MemoryPolicyStore::new();
        let seeder = Seeder::new(&policy, &registry, &store, &FailingInstances);

        let product = json!({"id": "p1", "ownerType": "Store", "ownerId": "A"});
        let err = seeder.seed("Product", &product, Some("u1"), None).await.unwrap_err();
        assert!(matches!(err, SecError::DataSource(_)), "{err}");

        let err = seeder.seed("Product", &json!({"ownerType": "Store", "ownerId": "A"}), None, None).await.unwrap_err();
        assert!(matches!(err, SecError::DataSource(_)), "{err}");
    }
}
