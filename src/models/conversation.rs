use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One durable conversation per unordered participant pair, with a
/// denormalized summary of the most recent message.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub participant1_id: Uuid,
    pub participant2_id: Uuid,
    pub last_message: Option<String>,
    pub last_message_sender_id: Option<Uuid>,
    pub last_message_receiver_id: Option<Uuid>,
    pub last_message_seen: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participant1_id == user_id || self.participant2_id == user_id
    }

    /// The counterpart of `user_id` in this conversation, or `None` when
    /// `user_id` is not a participant.
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        if self.participant1_id == user_id {
            Some(self.participant2_id)
        } else if self.participant2_id == user_id {
            Some(self.participant1_id)
        } else {
            None
        }
    }

    /// A participant who cleared their side of the chat no longer appears as
    /// last-message sender or receiver, so the summary text is hidden for them.
    pub fn last_message_visible_to(&self, user_id: Uuid) -> bool {
        self.last_message_sender_id == Some(user_id)
            || self.last_message_receiver_id == Some(user_id)
    }
}
