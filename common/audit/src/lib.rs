pub mod diff;
pub mod model;
pub mod recorder;

pub use diff::changed_fields;
pub use model::{
    AuditAction, AuditActor, AuditEntry, AuditError, AuditResult, EntityKind, Module, RequestMeta,
};
pub use recorder::{AuditInput, AuditRecorder};
