#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use gsec::data::MemoryInstances;
use gsec::models::{EntityRef, ModelDef, RelationDef};
use gsec::store::{MemoryPolicyStore, MembershipState, PolicyStore};
use gsec::{AccessOptions, GroupSecurity, ModelRegistry, Principal, SecurityOptions};

/// Store is the group; Invoice belongs to a Store; Product belongs to a
/// Store or directly to a User.
pub fn registry() -> ModelRegistry {
    ModelRegistry::new()
        .with(ModelDef::new("User"))
        .with(
            ModelDef::new("Store")
                .with_relation("invoices", RelationDef::has_many("Invoice"))
                .with_security(json!({
                    "roles": {
                        "member": {"title": "Member", "actions": ["read"]},
                        "manager": {"title": "Manager", "actions": ["write"], "inherits": "member"},
                        "admin": {"title": "Admin", "actions": ["delete", "manage"], "inherits": ["manager"]}
                    }
                })),
        )
        .with(ModelDef::new("Invoice").with_relation("store", RelationDef::belongs_to("Store")))
        .with(
            ModelDef::new("Product")
                .with_relation("owner", RelationDef::belongs_to_polymorphic("ownerType", "ownerId")),
        )
}

pub fn options() -> SecurityOptions {
    SecurityOptions::from_json_str(
        r#"{
            "groups": ["Store"],
            "rel": "store",
            "resources": {
                "Invoice": "store",
                "Product": {"rel": "owner", "polymorphicTypes": ["Store", "User"]}
            }
        }"#,
    )
    .expect("valid options")
}

pub struct Fixture {
    pub sec: GroupSecurity,
    pub store: Arc<MemoryPolicyStore>,
    pub instances: Arc<MemoryInstances>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_options(options()).await
    }

    pub async fn with_options(options: SecurityOptions) -> Self {
        let store = Arc::new(MemoryPolicyStore::new());
        let instances = Arc::new(MemoryInstances::new());
        let sec = GroupSecurity::boot(registry(), options, store.clone(), instances.clone())
            .await
            .expect("boot");
        Self { sec, store, instances }
    }

    /// Persist an instance and run the after-save hook as `creator`.
    pub async fn create(&self, creator: Option<&str>, model: &str, instance: Value, options: &AccessOptions) {
        self.instances.insert(model, instance.clone()).await.expect("insert");
        let principal = creator.map(Principal::new);
        self.sec
            .after_save(principal.as_ref(), model, &instance, true, options)
            .await
            .expect("seed");
    }

    pub async fn create_store(&self, creator: &str, id: &str) {
        self.create(Some(creator), "Store", json!({"id": id, "name": format!("Store {id}")}), &AccessOptions::default())
            .await;
    }

    /// Give `user` an active membership in `role` of the store `store_id`.
    pub async fn join(&self, user: &str, store_id: &str, role: &str) {
        let scope = EntityRef::new("Store", store_id);
        let roles = self
            .store
            .find_roles(&scope, Some(&[role.to_string()]))
            .await
            .expect("find roles");
        assert_eq!(roles.len(), 1, "role {role} not seeded in {scope}");
        self.store
            .assign_memberships(user, &roles, MembershipState::Active)
            .await
            .expect("assign");
    }

    pub async fn make_global_admin(&self, user: &str) {
        let admin = self.store.create_role(None, "admin").await.expect("role");
        self.store
            .assign_memberships(user, &[admin], MembershipState::Active)
            .await
            .expect("assign");
    }

    /// Two stores with two invoices in A and one in B.
    pub async fn with_invoices() -> Self {
        let fx = Self::new().await;
        fx.create_store("boss", "A").await;
        fx.create_store("other", "B").await;
        for (id, store) in [(1, "A"), (2, "A"), (3, "B")] {
            fx.create(
                Some("boss"),
                "Invoice",
                json!({"id": id, "storeId": store, "amount": id * 10}),
                &AccessOptions::default(),
            )
            .await;
        }
        fx
    }
}
