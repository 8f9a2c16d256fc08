use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::diff::changed_fields;
use crate::model::{
    AuditAction, AuditActor, AuditEntry, AuditError, AuditResult, EntityKind, Module, RequestMeta,
};

/// Input for one audit entry. Everything the entry is attributed to is
/// passed in by the observed operation; the recorder derives the rest.
#[derive(Debug, Clone)]
pub struct AuditInput {
    pub actor: AuditActor,
    pub action: AuditAction,
    pub entity: Option<(EntityKind, Uuid)>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub module: Option<Module>,
    pub description: Option<String>,
    pub meta: RequestMeta,
}

pub(crate) const INSERT_AUDIT_SQL: &str = "INSERT INTO audit_logs (\
     id, actor_id, actor_name, actor_role, entity_kind, entity_id, action, \
     description, old_values, new_values, changed_fields, ip, user_agent, \
     module, occurred_at\
     ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)";

/// Persists audit entries synchronously into `audit_logs`.
///
/// Recording must never fail the operation being observed: callers get the
/// error back only so they can count it; the recorder logs it and the
/// business transaction is unaffected either way.
#[derive(Clone)]
pub struct AuditRecorder {
    db: PgPool,
}

impl AuditRecorder {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Derive the full entry from an input: module from the entity kind,
    /// description from action + entity label, diff from both snapshots.
    pub fn build(input: AuditInput) -> AuditEntry {
        let (entity_kind, entity_id) = match input.entity {
            Some((kind, id)) => (Some(kind), Some(id)),
            None => (None, None),
        };
        let module = input
            .module
            .or_else(|| entity_kind.map(EntityKind::module))
            .unwrap_or(Module::Aims);
        let description = input.description.unwrap_or_else(|| match entity_kind {
            Some(kind) => format!("{} {}", input.action.as_str(), kind.label()),
            None => input.action.as_str().to_string(),
        });
        let changed = match (&input.old_values, &input.new_values) {
            (Some(old), Some(new)) => Value::Object(changed_fields(old, new)),
            _ => Value::Object(Default::default()),
        };
        AuditEntry {
            id: Uuid::new_v4(),
            actor: input.actor,
            entity_kind,
            entity_id,
            action: input.action,
            description,
            old_values: input.old_values,
            new_values: input.new_values,
            changed_fields: changed,
            meta: input.meta,
            module,
            occurred_at: Utc::now(),
        }
    }

    pub async fn record(&self, input: AuditInput) -> AuditResult<AuditEntry> {
        let entry = Self::build(input);
        let result = sqlx::query(INSERT_AUDIT_SQL)
            .bind(entry.id)
            .bind(entry.actor.id)
            .bind(entry.actor.name.as_deref())
            .bind(entry.actor.role.as_deref())
            .bind(entry.entity_kind.map(EntityKind::as_str))
            .bind(entry.entity_id)
            .bind(entry.action.as_str())
            .bind(&entry.description)
            .bind(&entry.old_values)
            .bind(&entry.new_values)
            .bind(&entry.changed_fields)
            .bind(entry.meta.ip.as_deref())
            .bind(entry.meta.user_agent.as_deref())
            .bind(entry.module.as_str())
            .bind(entry.occurred_at)
            .execute(&self.db)
            .await;
        match result {
            Ok(_) => Ok(entry),
            Err(e) => {
                tracing::warn!(error = %e, action = entry.action.as_str(), "failed to persist audit entry");
                Err(AuditError::Database(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(action: AuditAction, entity: Option<(EntityKind, Uuid)>) -> AuditInput {
        AuditInput {
            actor: AuditActor::default(),
            action,
            entity,
            old_values: None,
            new_values: None,
            module: None,
            description: None,
            meta: RequestMeta::default(),
        }
    }

    #[test]
    fn module_derived_from_entity_kind() {
        let entry = AuditRecorder::build(input(
            AuditAction::Approved,
            Some((EntityKind::PurchaseRequest, Uuid::new_v4())),
        ));
        assert_eq!(entry.module, Module::Aims);
    }

    #[test]
    fn explicit_module_wins_over_derivation() {
        let mut i = input(AuditAction::Login, None);
        i.module = Some(Module::Hrms);
        let entry = AuditRecorder::build(i);
        assert_eq!(entry.module, Module::Hrms);
    }

    #[test]
    fn entryless_action_defaults_to_aims_module() {
        let entry = AuditRecorder::build(input(AuditAction::Logout, None));
        assert_eq!(entry.module, Module::Aims);
        assert_eq!(entry.description, "logout");
    }

    #[test]
    fn default_description_is_action_plus_label() {
        let entry = AuditRecorder::build(input(
            AuditAction::Fulfilled,
            Some((EntityKind::SalesOrder, Uuid::new_v4())),
        ));
        assert_eq!(entry.description, "fulfilled sales order");
    }

    #[test]
    fn diff_computed_only_with_both_snapshots() {
        let mut i = input(
            AuditAction::Updated,
            Some((EntityKind::Item, Uuid::new_v4())),
        );
        i.old_values = Some(json!({"name": "Bolt"}));
        i.new_values = Some(json!({"name": "Bolt M8"}));
        let entry = AuditRecorder::build(i.clone());
        assert_eq!(entry.changed_fields["name"]["new"], "Bolt M8");

        i.old_values = None;
        let entry = AuditRecorder::build(i);
        assert_eq!(entry.changed_fields, json!({}));
    }

    #[test]
    fn insert_sql_matches_audit_logs_columns() {
        assert!(INSERT_AUDIT_SQL.starts_with("INSERT INTO audit_logs"));
        assert!(INSERT_AUDIT_SQL.contains("changed_fields"));
        assert!(INSERT_AUDIT_SQL.contains("$15"));
    }
}
