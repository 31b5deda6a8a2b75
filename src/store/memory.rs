use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Membership, MembershipFilter, MembershipState, PolicyStore, RoleRecord, Subject};
use crate::actions::ActionKey;
use crate::errors::{SecError, SecResult};
use crate::models::EntityRef;

#[derive(Debug, Default)]
struct Inner {
    roles: Vec<RoleRecord>,
    /// role id -> parent role ids
    inherits: BTreeMap<String, BTreeSet<String>>,
    memberships: Vec<Membership>,
    /// (subject key, entity, action)
    grants: HashSet<(String, EntityRef, ActionKey)>,
    actions: BTreeMap<String, BTreeSet<ActionKey>>,
    secured: BTreeMap<String, bool>,
}

/// Process-local policy store.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    inner: RwLock<Inner>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiled action keys registered for `model`.
    pub async fn registered_actions(&self, model: &str) -> Vec<ActionKey> {
        let inner = self.inner.read().await;
        inner
            .actions
            .get(model)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Row-security flag recorded for `model`, if secured.
    pub async fn secured_rowlevel(&self, model: &str) -> Option<bool> {
        self.inner.read().await.secured.get(model).copied()
    }

    /// Actions directly granted to `role` on `entity`.
    pub async fn granted_actions(&self, role: &RoleRecord, entity: &EntityRef) -> Vec<ActionKey> {
        let key = Subject::Role(role.id.clone()).key();
        let inner = self.inner.read().await;
        let mut actions: Vec<ActionKey> = inner
            .grants
            .iter()
            .filter(|(subject, target, _)| subject == &key && target == entity)
            .map(|(_, _, action)| action.clone())
            .collect();
        actions.sort();
        actions
    }
}

impl Inner {
    fn role_by_name(&self, scope: Option<&EntityRef>, name: &str) -> Option<&RoleRecord> {
        self.roles
            .iter()
            .find(|r| r.name == name && r.scope.as_ref() == scope)
    }

    fn role_by_id(&self, id: &str) -> Option<&RoleRecord> {
        self.roles.iter().find(|r| r.id == id)
    }

    /// `seeds` plus every role reachable through inheritance edges.
    fn with_ancestors(&self, seeds: Vec<String>) -> Vec<String> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut ordered = Vec::new();
        let mut queue: VecDeque<String> = seeds.into();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(parents) = self.inherits.get(&id) {
                queue.extend(parents.iter().cloned());
            }
            ordered.push(id);
        }
        ordered
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn create_role(&self, scope: Option<&EntityRef>, name: &str) -> SecResult<RoleRecord> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.role_by_name(scope, name) {
            return Ok(existing.clone());
        }
        let role = RoleRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            scope: scope.cloned(),
        };
        inner.roles.push(role.clone());
        Ok(role)
    }

    async fn inherit_role_from(&self, role: &RoleRecord, parents: &[String]) -> SecResult<()> {
        let mut inner = self.inner.write().await;
        let mut parent_ids = Vec::with_capacity(parents.len());
        for name in parents {
            let parent = inner.role_by_name(role.scope.as_ref(), name).ok_or_else(|| {
                SecError::store(format!("parent role {name} not found for role {}", role.name))
            })?;
            parent_ids.push(parent.id.clone());
        }
        inner.inherits.entry(role.id.clone()).or_default().extend(parent_ids);
        Ok(())
    }

    async fn find_roles(&self, scope: &EntityRef, names: Option<&[String]>) -> SecResult<Vec<RoleRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .roles
            .iter()
            .filter(|r| r.scope.as_ref() == Some(scope))
            .filter(|r| names.map(|names| names.contains(&r.name)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn find_user_roles(
        &self,
        user_id: &str,
        scope: &EntityRef,
        include_inherited: bool,
    ) -> SecResult<Vec<RoleRecord>> {
        let inner = self.inner.read().await;
        let direct: Vec<String> = inner
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id && m.state == MembershipState::Active)
            .filter(|m| m.scope.as_ref() == Some(scope))
            .map(|m| m.role_id.clone())
            .collect();

        let ids = if include_inherited { inner.with_ancestors(direct) } else { direct };
        Ok(ids
            .iter()
            .filter_map(|id| inner.role_by_id(id))
            .cloned()
            .collect())
    }

    async fn find_memberships(&self, filter: &MembershipFilter) -> SecResult<Vec<Membership>> {
        let inner = self.inner.read().await;
        Ok(inner
            .memberships
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect())
    }

    async fn assign_memberships(
        &self,
        user_id: &str,
        roles: &[RoleRecord],
        state: MembershipState,
    ) -> SecResult<()> {
        let mut inner = self.inner.write().await;
        for role in roles {
            if let Some(existing) = inner
                .memberships
                .iter_mut()
                .find(|m| m.user_id == user_id && m.role_id == role.id)
            {
                existing.state = state;
                continue;
            }
            inner.memberships.push(Membership {
                user_id: user_id.to_string(),
                role_id: role.id.clone(),
                scope: role.scope.clone(),
                state,
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn check_permission(&self, subjects: &[Subject], entity: &EntityRef, action: &ActionKey) -> SecResult<bool> {
        let inner = self.inner.read().await;
        Ok(subjects.iter().any(|subject| {
            inner
                .grants
                .contains(&(subject.key(), entity.clone(), action.clone()))
        }))
    }

    async fn has_role(&self, user_id: &str, role_name: &str) -> SecResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner.memberships.iter().any(|m| {
            m.user_id == user_id
                && m.state == MembershipState::Active
                && m.scope.is_none()
                && inner.role_by_id(&m.role_id).map(|r| r.name == role_name).unwrap_or(false)
        }))
    }

    async fn allow(&self, role: &RoleRecord, entity: &EntityRef, actions: &[ActionKey]) -> SecResult<()> {
        let mut inner = self.inner.write().await;
        let subject = Subject::Role(role.id.clone()).key();
        for action in actions {
            inner.grants.insert((subject.clone(), entity.clone(), action.clone()));
        }
        Ok(())
    }

    async fn register_actions(&self, model: &str, actions: &[ActionKey]) -> SecResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .actions
            .entry(model.to_string())
            .or_default()
            .extend(actions.iter().cloned());
        Ok(())
    }

    async fn secure_model(&self, model: &str, rowlevel: bool) -> SecResult<()> {
        self.inner.write().await.secured.insert(model.to_string(), rowlevel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inherited_roles_are_expanded_transitively() {
        let store = MemoryPolicyStore::new();
        let store_a = EntityRef::new("Store", "A");

        let member = store.create_role(Some(&store_a), "member").await.unwrap();
        let manager = store.create_role(Some(&store_a), "manager").await.unwrap();
        let admin = store.create_role(Some(&store_a), "admin").await.unwrap();
        store.inherit_role_from(&manager, &["member".to_string()]).await.unwrap();
        store.inherit_role_from(&admin, &["manager".to_string()]).await.unwrap();

        store.assign_memberships("u1", &[admin.clone()], MembershipState::Active).await.unwrap();

        let direct = store.find_user_roles("u1", &store_a, false).await.unwrap();
        assert_eq!(direct, vec![admin.clone()]);

        let expanded = store.find_user_roles("u1", &store_a, true).await.unwrap();
        let names: Vec<&str> = expanded.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["admin", "manager", "member"]);

        store.allow(&member, &store_a, &[ActionKey::new("read")]).await.unwrap();
        let subjects: Vec<Subject> = expanded.iter().map(|r| Subject::Role(r.id.clone())).collect();
        assert!(store.check_permission(&subjects, &store_a, &ActionKey::new("READ")).await.unwrap());
        assert!(!store.check_permission(&subjects, &store_a, &ActionKey::new("WRITE")).await.unwrap());
    }

    #[tokio::test]
    async fn create_role_is_idempotent_per_scope() {
        let store = MemoryPolicyStore::new();
        let a = EntityRef::new("Store", "A");
        let b = EntityRef::new("Store", "B");

        let first = store.create_role(Some(&a), "member").await.unwrap();
        let again = store.create_role(Some(&a), "member").await.unwrap();
        let other = store.create_role(Some(&b), "member").await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first.id, other.id);
        assert_eq!(store.find_roles(&a, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn global_admin_role_is_not_a_scoped_role() {
        let store = MemoryPolicyStore::new();
        let a = EntityRef::new("Store", "A");

        let scoped_admin = store.create_role(Some(&a), "admin").await.unwrap();
        store.assign_memberships("u1", &[scoped_admin], MembershipState::Active).await.unwrap();
        assert!(!store.has_role("u1", "admin").await.unwrap());

        let global_admin = store.create_role(None, "admin").await.unwrap();
        store.assign_memberships("u2", &[global_admin], MembershipState::Active).await.unwrap();
        assert!(store.has_role("u2", "admin").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_parent_role_is_a_store_error() {
        let store = MemoryPolicyStore::new();
        let a = EntityRef::new("Store", "A");
        let admin = store.create_role(Some(&a), "admin").await.unwrap();

        let err = store.inherit_role_from(&admin, &["ghost".to_string()]).await.unwrap_err();
        assert!(matches!(err, SecError::Store(_)));
    }
}
