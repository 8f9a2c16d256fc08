use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Caller identity an entry is attributed to. Always passed explicitly by
/// the operation being audited, never read from ambient state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuditActor {
    pub id: Option<Uuid>,
    pub name: Option<String>,
    pub role: Option<String>,
}

/// Request metadata captured alongside an entry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Closed set of trackable entity kinds. Keeping this an enum (rather than a
/// free-form type string) lets diff/describe logic match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Item,
    StockMovement,
    PurchaseRequest,
    ReplenishmentOrder,
    SalesOrder,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Item => "item",
            EntityKind::StockMovement => "stock_movement",
            EntityKind::PurchaseRequest => "purchase_request",
            EntityKind::ReplenishmentOrder => "replenishment_order",
            EntityKind::SalesOrder => "sales_order",
        }
    }

    /// Human label used in default descriptions.
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Item => "item",
            EntityKind::StockMovement => "stock movement",
            EntityKind::PurchaseRequest => "purchase request",
            EntityKind::ReplenishmentOrder => "replenishment order",
            EntityKind::SalesOrder => "sales order",
        }
    }

    /// Domain module an entry for this entity belongs to.
    pub fn module(self) -> Module {
        match self {
            EntityKind::Item
            | EntityKind::StockMovement
            | EntityKind::PurchaseRequest
            | EntityKind::ReplenishmentOrder
            | EntityKind::SalesOrder => Module::Aims,
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "item" => Ok(EntityKind::Item),
            "stock_movement" => Ok(EntityKind::StockMovement),
            "purchase_request" => Ok(EntityKind::PurchaseRequest),
            "replenishment_order" => Ok(EntityKind::ReplenishmentOrder),
            "sales_order" => Ok(EntityKind::SalesOrder),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
    Approved,
    Rejected,
    Fulfilled,
    Cancelled,
    StockIn,
    StockOut,
    Login,
    Logout,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Updated => "updated",
            AuditAction::Deleted => "deleted",
            AuditAction::Approved => "approved",
            AuditAction::Rejected => "rejected",
            AuditAction::Fulfilled => "fulfilled",
            AuditAction::Cancelled => "cancelled",
            AuditAction::StockIn => "stock_in",
            AuditAction::StockOut => "stock_out",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
        }
    }
}

impl std::str::FromStr for AuditAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(AuditAction::Created),
            "updated" => Ok(AuditAction::Updated),
            "deleted" => Ok(AuditAction::Deleted),
            "approved" => Ok(AuditAction::Approved),
            "rejected" => Ok(AuditAction::Rejected),
            "fulfilled" => Ok(AuditAction::Fulfilled),
            "cancelled" => Ok(AuditAction::Cancelled),
            "stock_in" => Ok(AuditAction::StockIn),
            "stock_out" => Ok(AuditAction::StockOut),
            "login" => Ok(AuditAction::Login),
            "logout" => Ok(AuditAction::Logout),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Aims,
    Hrms,
    Payroll,
}

impl Module {
    pub fn as_str(self) -> &'static str {
        match self {
            Module::Aims => "aims",
            Module::Hrms => "hrms",
            Module::Payroll => "payroll",
        }
    }
}

impl std::str::FromStr for Module {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aims" => Ok(Module::Aims),
            "hrms" => Ok(Module::Hrms),
            "payroll" => Ok(Module::Payroll),
            _ => Err(()),
        }
    }
}

/// One persisted audit log entry. Append-only; there is no update path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor: AuditActor,
    pub entity_kind: Option<EntityKind>,
    pub entity_id: Option<Uuid>,
    pub action: AuditAction,
    pub description: String,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    /// Field-level diff: `{field: {"old": .., "new": ..}}`.
    pub changed_fields: Value,
    pub meta: RequestMeta,
    pub module: Module,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("database error: {0}")]
    Database(String),
}

pub type AuditResult<T> = Result<T, AuditError>;
