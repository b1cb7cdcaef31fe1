use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedulingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationMode {
    Created,
    Reminder,
    ConfirmWaitlist,
}

impl std::fmt::Display for NotificationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationMode::Created => "created",
            NotificationMode::Reminder => "reminder",
            NotificationMode::ConfirmWaitlist => "confirm_waitlist",
        };
        f.write_str(s)
    }
}

/// Outcome of interpreting an inbound patient reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyAction {
    Confirmed,
    Cancelled,
    Unrecognized,
}

/// Outbound messaging collaborator. Delivery is best effort and never feeds
/// back into booking correctness; implementations live outside this
/// repository (email/SMS gateways).
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send_appointment_notification(
        &self,
        appointment_id: Uuid,
        mode: NotificationMode,
    ) -> Result<(), SchedulingError>;
}
