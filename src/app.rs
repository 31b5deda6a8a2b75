use std::sync::Arc;

use serde_json::Value;

use crate::authz::{AccessDecision, AccessOptions, AccessRequest, AccessResolver, Principal, RowFilterBuilder};
use crate::config::SecurityOptions;
use crate::data::InstanceSource;
use crate::errors::SecResult;
use crate::models::ModelRegistry;
use crate::security::{self, SecurityPolicy, SeedReport, Seeder};
use crate::store::PolicyStore;

/// Shared handle to the compiled policy and its collaborators. Cheap to
/// clone; the policy is immutable after [`GroupSecurity::boot`].
#[derive(Clone)]
pub struct GroupSecurity {
    pub policy: Arc<SecurityPolicy>,
    pub registry: Arc<ModelRegistry>,
    pub store: Arc<dyn PolicyStore>,
    pub instances: Arc<dyn InstanceSource>,
}

impl GroupSecurity {
    /// Compile the policy, then register every secured model and its action
    /// keys with the store. Fails before serving anything if the settings
    /// are malformed.
    pub async fn boot(
        registry: ModelRegistry,
        options: SecurityOptions,
        store: Arc<dyn PolicyStore>,
        instances: Arc<dyn InstanceSource>,
    ) -> SecResult<Self> {
        let policy = security::compile(&registry, options)?;

        if policy.options().enabled {
            for profile in policy.profiles() {
                let actions: Vec<_> = profile.action_keys().cloned().collect();
                store.register_actions(&profile.model, &actions).await?;
                store.secure_model(&profile.model, profile.rowlevel).await?;
                tracing::debug!(
                    model = %profile.model,
                    rowlevel = profile.rowlevel,
                    actions = actions.len(),
                    "secured model"
                );
            }
            tracing::info!(
                groups = policy.groups().count(),
                resources = policy.resources().count(),
                "group security policy compiled"
            );
        } else {
            tracing::info!("group security disabled");
        }

        Ok(Self {
            policy: Arc::new(policy),
            registry: Arc::new(registry),
            store,
            instances,
        })
    }

    pub fn resolver(&self) -> AccessResolver<'_> {
        AccessResolver::new(&self.policy, &self.registry, self.store.as_ref(), self.instances.as_ref())
    }

    pub fn row_filter(&self) -> RowFilterBuilder<'_> {
        RowFilterBuilder::new(&self.policy, &self.registry, self.store.as_ref())
    }

    pub fn seeder(&self) -> Seeder<'_> {
        Seeder::new(&self.policy, &self.registry, self.store.as_ref(), self.instances.as_ref())
    }

    pub async fn check_access(&self, request: &AccessRequest) -> SecResult<AccessDecision> {
        self.resolver().check(request).await
    }

    /// Hook for list/count queries: the `where` to run with.
    pub async fn before_access(
        &self,
        principal: Option<&Principal>,
        model: &str,
        existing: Option<Value>,
        options: &AccessOptions,
    ) -> SecResult<Option<Value>> {
        self.row_filter().scope_where(principal, model, existing, options).await
    }

    /// Hook for saved instances: seeds default roles and grants the first
    /// time an instance is persisted.
    pub async fn after_save(
        &self,
        principal: Option<&Principal>,
        model: &str,
        instance: &Value,
        is_new: bool,
        options: &AccessOptions,
    ) -> SecResult<SeedReport> {
        if !is_new || !self.policy.options().enabled {
            return Ok(SeedReport::default());
        }
        self.seeder()
            .seed(
                model,
                instance,
                principal.map(Principal::id),
                options.creator_roles.as_deref(),
            )
            .await
    }
}
