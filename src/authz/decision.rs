use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::actions::ActionKey;
use crate::models::GroupRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowReason {
    /// Security is turned off process-wide.
    Disabled,
    /// The caller suppressed checks for this call.
    Skipped,
    /// The model is neither a group nor a resource.
    Unsecured,
    /// The principal holds the global admin role.
    Admin,
    /// No owning group could be determined.
    Unscoped,
    /// The current group is the principal's own user record.
    SelfAccess,
    Granted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenyReason {
    Unauthenticated,
    NotPermitted { group: GroupRef, action: ActionKey },
    /// Allowed in the current group but not in the group the payload moves
    /// the instance to.
    ReassignmentNotPermitted { group: GroupRef, action: ActionKey },
    /// No owning group could be determined and unscoped access is denied.
    Unscoped,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Unauthenticated => f.write_str("authentication required"),
            DenyReason::NotPermitted { group, action } => write!(f, "{action} not permitted in {group}"),
            DenyReason::ReassignmentNotPermitted { group, action } => {
                write!(f, "{action} not permitted in target group {group}")
            }
            DenyReason::Unscoped => f.write_str("operation is not tied to a group"),
        }
    }
}

/// Outcome of an access check. Denials are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "detail", rename_all = "snake_case")]
pub enum AccessDecision {
    Allowed(AllowReason),
    Denied(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed(_))
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            AccessDecision::Denied(reason) => Some(reason),
            AccessDecision::Allowed(_) => None,
        }
    }
}

#[derive(Serialize)]
struct DeniedResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for AccessDecision {
    fn into_response(self) -> Response {
        match self {
            AccessDecision::Allowed(_) => StatusCode::NO_CONTENT.into_response(),
            AccessDecision::Denied(reason) => {
                let (status, error) = match reason {
                    DenyReason::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthorized"),
                    _ => (StatusCode::FORBIDDEN, "forbidden"),
                };
                let payload = DeniedResponse {
                    error,
                    message: reason.to_string(),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}
