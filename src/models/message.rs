use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A persisted message. `sender_id` / `receiver_id` become `None` when that
/// participant clears the conversation on their side.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub receiver_id: Option<Uuid>,
    #[serde(rename = "text")]
    pub body: String,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}
