use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use common_audit::{AuditAction, EntityKind, Module};
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{db_error, AppState};

#[derive(Debug, Deserialize, Default)]
pub struct AuditLogQuery {
    pub entity_kind: Option<String>,
    pub entity_id: Option<Uuid>,
    pub action: Option<String>,
    pub actor_id: Option<Uuid>,
    pub module: Option<String>,
    /// Cursor: entries strictly older than this timestamp.
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AuditLogRow {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub actor_name: Option<String>,
    pub actor_role: Option<String>,
    pub entity_kind: Option<String>,
    pub entity_id: Option<Uuid>,
    pub action: String,
    pub description: String,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub changed_fields: Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub module: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AuditLogResponse {
    pub entries: Vec<AuditLogRow>,
    /// Pass back as `before` to fetch the next (older) page.
    pub next_before: Option<DateTime<Utc>>,
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<AuditLogResponse>, ApiError> {
    // Filters are validated against the closed enums so a typo comes back as
    // a 400 instead of an empty page.
    let entity_kind = match &query.entity_kind {
        Some(raw) => Some(
            raw.parse::<EntityKind>()
                .map_err(|_| ApiError::validation("invalid_entity_kind", Some("entity_kind")))?,
        ),
        None => None,
    };
    let action = match &query.action {
        Some(raw) => Some(
            raw.parse::<AuditAction>()
                .map_err(|_| ApiError::validation("invalid_action", Some("action")))?,
        ),
        None => None,
    };
    let module = match &query.module {
        Some(raw) => Some(
            raw.parse::<Module>()
                .map_err(|_| ApiError::validation("invalid_module", Some("module")))?,
        ),
        None => None,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 200);

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT id, actor_id, actor_name, actor_role, entity_kind, entity_id, action, \
         description, old_values, new_values, changed_fields, ip, user_agent, module, \
         occurred_at FROM audit_logs WHERE 1 = 1",
    );
    if let Some(kind) = entity_kind {
        builder.push(" AND entity_kind = ");
        builder.push_bind(kind.as_str());
    }
    if let Some(entity_id) = query.entity_id {
        builder.push(" AND entity_id = ");
        builder.push_bind(entity_id);
    }
    if let Some(action) = action {
        builder.push(" AND action = ");
        builder.push_bind(action.as_str());
    }
    if let Some(actor_id) = query.actor_id {
        builder.push(" AND actor_id = ");
        builder.push_bind(actor_id);
    }
    if let Some(module) = module {
        builder.push(" AND module = ");
        builder.push_bind(module.as_str());
    }
    if let Some(before) = query.before {
        builder.push(" AND occurred_at < ");
        builder.push_bind(before);
    }
    builder.push(" ORDER BY occurred_at DESC, id DESC LIMIT ");
    builder.push_bind(limit);

    let entries = builder
        .build_query_as::<AuditLogRow>()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;
    let next_before = entries.last().map(|entry| entry.occurred_at);

    Ok(Json(AuditLogResponse {
        entries,
        next_before,
    }))
}
