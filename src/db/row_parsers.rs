use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::errors::SecError;
use crate::models::EntityRef;
use crate::store::{Membership, MembershipState, RoleRecord};

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, SecError> {
    let s = s.trim();

    // Try RFC3339 first (e.g. 2025-11-19T12:34:56Z)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite default timestamp format: "YYYY-MM-DD HH:MM:SS" (with optional fractional seconds)
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| SecError::store("invalid datetime: date out of range"))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(SecError::store(format!("invalid datetime: {}", s)))
}

/// Empty scope columns mean a global (unscoped) record.
fn parse_scope(scope_type: String, scope_id: String) -> Option<EntityRef> {
    if scope_type.is_empty() {
        None
    } else {
        Some(EntityRef::new(scope_type, scope_id))
    }
}

pub fn role_from_row(row: &SqliteRow) -> Result<RoleRecord, SecError> {
    let id: String = row.try_get("id").map_err(|e| SecError::store(format!("missing id: {}", e)))?;
    let name: String = row.try_get("name").map_err(|e| SecError::store(format!("missing name: {}", e)))?;
    let scope_type: String = row
        .try_get("scope_type")
        .map_err(|e| SecError::store(format!("missing scope_type: {}", e)))?;
    let scope_id: String = row
        .try_get("scope_id")
        .map_err(|e| SecError::store(format!("missing scope_id: {}", e)))?;

    Ok(RoleRecord {
        id,
        name,
        scope: parse_scope(scope_type, scope_id),
    })
}

pub fn membership_from_row(row: &SqliteRow) -> Result<Membership, SecError> {
    let user_id: String = row
        .try_get("user_id")
        .map_err(|e| SecError::store(format!("missing user_id: {}", e)))?;
    let role_id: String = row
        .try_get("role_id")
        .map_err(|e| SecError::store(format!("missing role_id: {}", e)))?;
    let scope_type: String = row
        .try_get("scope_type")
        .map_err(|e| SecError::store(format!("missing scope_type: {}", e)))?;
    let scope_id: String = row
        .try_get("scope_id")
        .map_err(|e| SecError::store(format!("missing scope_id: {}", e)))?;
    let state_s: String = row
        .try_get("state")
        .map_err(|e| SecError::store(format!("missing state: {}", e)))?;
    let created_at_s: String = row
        .try_get("created_at")
        .map_err(|e| SecError::store(format!("missing created_at: {}", e)))?;

    Ok(Membership {
        user_id,
        role_id,
        scope: parse_scope(scope_type, scope_id),
        state: MembershipState::parse(&state_s)?,
        created_at: parse_datetime(&created_at_s)?,
    })
}
