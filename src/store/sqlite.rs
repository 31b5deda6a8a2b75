use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{Membership, MembershipFilter, MembershipState, PolicyStore, RoleRecord, Subject};
use crate::actions::ActionKey;
use crate::db::row_parsers::{membership_from_row, role_from_row};
use crate::errors::{SecError, SecResult};
use crate::models::EntityRef;

/// Policy store backed by the `sec_*` tables.
#[derive(Debug, Clone)]
pub struct SqlitePolicyStore {
    pool: SqlitePool,
}

impl SqlitePolicyStore {
    /// Wrap a pool whose schema is already migrated (see [`crate::db::connect`]).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn role_by_name(&self, scope: Option<&EntityRef>, name: &str) -> SecResult<Option<RoleRecord>> {
        let (scope_type, scope_id) = scope_columns(scope);
        let row = sqlx::query(
            "SELECT id, name, scope_type, scope_id FROM sec_roles WHERE name = ? AND scope_type = ? AND scope_id = ?",
        )
        .bind(name)
        .bind(scope_type)
        .bind(scope_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(role_from_row).transpose()
    }
}

fn scope_columns(scope: Option<&EntityRef>) -> (&str, &str) {
    match scope {
        Some(scope) => (scope.model.as_str(), scope.id.as_str()),
        None => ("", ""),
    }
}

#[async_trait]
impl PolicyStore for SqlitePolicyStore {
    async fn create_role(&self, scope: Option<&EntityRef>, name: &str) -> SecResult<RoleRecord> {
        let (scope_type, scope_id) = scope_columns(scope);
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT OR IGNORE INTO sec_roles (id, name, scope_type, scope_id, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(scope_type)
        .bind(scope_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.role_by_name(scope, name)
            .await?
            .ok_or_else(|| SecError::store(format!("role {name} vanished after insert")))
    }

    async fn inherit_role_from(&self, role: &RoleRecord, parents: &[String]) -> SecResult<()> {
        for name in parents {
            let parent = self
                .role_by_name(role.scope.as_ref(), name)
                .await?
                .ok_or_else(|| SecError::store(format!("parent role {name} not found for role {}", role.name)))?;

            sqlx::query("INSERT OR IGNORE INTO sec_role_inherits (role_id, parent_id) VALUES (?, ?)")
                .bind(&role.id)
                .bind(&parent.id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn find_roles(&self, scope: &EntityRef, names: Option<&[String]>) -> SecResult<Vec<RoleRecord>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, name, scope_type, scope_id FROM sec_roles WHERE scope_type = ");
        builder.push_bind(&scope.model);
        builder.push(" AND scope_id = ");
        builder.push_bind(&scope.id);

        if let Some(names) = names {
            if names.is_empty() {
                return Ok(Vec::new());
            }
            builder.push(" AND name IN (");
            let mut separated = builder.separated(", ");
            for name in names {
                separated.push_bind(name);
            }
            separated.push_unseparated(")");
        }
        builder.push(" ORDER BY name");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(role_from_row).collect()
    }

    async fn find_user_roles(
        &self,
        user_id: &str,
        scope: &EntityRef,
        include_inherited: bool,
    ) -> SecResult<Vec<RoleRecord>> {
        let sql = if include_inherited {
            r#"
            WITH RECURSIVE granted(id) AS (
                SELECT m.role_id FROM sec_memberships m
                JOIN sec_roles r ON r.id = m.role_id
                WHERE m.user_id = ? AND m.state = 'active' AND r.scope_type = ? AND r.scope_id = ?
                UNION
                SELECT i.parent_id FROM sec_role_inherits i
                JOIN granted g ON i.role_id = g.id
            )
            SELECT r.id, r.name, r.scope_type, r.scope_id FROM sec_roles r
            JOIN granted g ON r.id = g.id
            "#
        } else {
            r#"
            SELECT r.id, r.name, r.scope_type, r.scope_id FROM sec_memberships m
            JOIN sec_roles r ON r.id = m.role_id
            WHERE m.user_id = ? AND m.state = 'active' AND r.scope_type = ? AND r.scope_id = ?
            "#
        };

        let rows = sqlx::query(sql)
            .bind(user_id)
            .bind(&scope.model)
            .bind(&scope.id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(role_from_row).collect()
    }

    async fn find_memberships(&self, filter: &MembershipFilter) -> SecResult<Vec<Membership>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT user_id, role_id, scope_type, scope_id, state, created_at FROM sec_memberships WHERE 1 = 1",
        );
        if let Some(user_id) = &filter.user_id {
            builder.push(" AND user_id = ");
            builder.push_bind(user_id);
        }
        if let Some(scope_type) = &filter.scope_type {
            builder.push(" AND scope_type = ");
            builder.push_bind(scope_type);
        }
        if let Some(scope_id) = &filter.scope_id {
            builder.push(" AND scope_id = ");
            builder.push_bind(scope_id);
        }
        if let Some(state) = filter.state {
            builder.push(" AND state = ");
            builder.push_bind(state.as_str());
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(membership_from_row).collect()
    }

    async fn assign_memberships(
        &self,
        user_id: &str,
        roles: &[RoleRecord],
        state: MembershipState,
    ) -> SecResult<()> {
        let mut tx = self.pool.begin().await?;
        for role in roles {
            let (scope_type, scope_id) = scope_columns(role.scope.as_ref());
            sqlx::query(
                r#"
                INSERT INTO sec_memberships (user_id, role_id, scope_type, scope_id, state, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (user_id, role_id) DO UPDATE SET state = excluded.state
                "#,
            )
            .bind(user_id)
            .bind(&role.id)
            .bind(scope_type)
            .bind(scope_id)
            .bind(state.as_str())
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn check_permission(&self, subjects: &[Subject], entity: &EntityRef, action: &ActionKey) -> SecResult<bool> {
        if subjects.is_empty() {
            return Ok(false);
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM sec_permissions WHERE entity_type = ");
        builder.push_bind(&entity.model);
        builder.push(" AND entity_id = ");
        builder.push_bind(&entity.id);
        builder.push(" AND action = ");
        builder.push_bind(action.as_str());
        builder.push(" AND subject IN (");
        let mut separated = builder.separated(", ");
        for subject in subjects {
            separated.push_bind(subject.key());
        }
        separated.push_unseparated(")");

        let count: i64 = builder.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(count > 0)
    }

    async fn has_role(&self, user_id: &str, role_name: &str) -> SecResult<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM sec_memberships m
            JOIN sec_roles r ON r.id = m.role_id
            WHERE m.user_id = ? AND m.state = 'active' AND r.name = ? AND r.scope_type = ''
            "#,
        )
        .bind(user_id)
        .bind(role_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn allow(&self, role: &RoleRecord, entity: &EntityRef, actions: &[ActionKey]) -> SecResult<()> {
        let subject = Subject::Role(role.id.clone()).key();
        let mut tx = self.pool.begin().await?;
        for action in actions {
            sqlx::query(
                "INSERT OR IGNORE INTO sec_permissions (subject, entity_type, entity_id, action) VALUES (?, ?, ?, ?)",
            )
            .bind(&subject)
            .bind(&entity.model)
            .bind(&entity.id)
            .bind(action.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn register_actions(&self, model: &str, actions: &[ActionKey]) -> SecResult<()> {
        let mut tx = self.pool.begin().await?;
        for action in actions {
            sqlx::query("INSERT OR IGNORE INTO sec_actions (model, action) VALUES (?, ?)")
                .bind(model)
                .bind(action.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn secure_model(&self, model: &str, rowlevel: bool) -> SecResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sec_secured_models (model, rowlevel) VALUES (?, ?)
            ON CONFLICT (model) DO UPDATE SET rowlevel = excluded.rowlevel
            "#,
        )
        .bind(model)
        .bind(rowlevel)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
