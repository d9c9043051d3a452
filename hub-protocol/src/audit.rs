//! Audit event shape. The core only commits to emitting
//! these events; storage is an external collaborator.

use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::command::CommandId;
use crate::identity::UserIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Admitted,
    RejectedValidation,
    RejectedRate,
    Started,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub user: UserIdentity,
    pub command_id: CommandId,
    pub request_id: Uuid,
    pub outcome: AuditOutcome,
    pub detail: String,
}

impl AuditEvent {
    pub fn new(
        user: UserIdentity,
        command_id: CommandId,
        request_id: Uuid,
        outcome: AuditOutcome,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user,
            command_id,
            request_id,
            outcome,
            detail: detail.into(),
        }
    }
}
