//! Conversation/message coordinator.
//!
//! Every write path runs as a single transaction against the authoritative
//! store; live-connection pushes are the caller's concern and happen only
//! after commit.

use crate::error::AppError;
use crate::models::{Conversation, Message};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

/// Result of a mark-seen update, carrying enough context for the caller to
/// decide whether to emit a `MESSAGES_SEEN` notification and to whom.
#[derive(Debug, Clone, Copy)]
pub struct SeenUpdate {
    pub rows_affected: u64,
    pub other_participant: Uuid,
}

pub struct ChatService;

impl ChatService {
    /// Resolve (or lazily create) the conversation for the unordered pair,
    /// persist the message, and update the conversation summary, all in one
    /// transaction. Returns the persisted row.
    pub async fn send_message(
        db: &Pool<Postgres>,
        sender_id: Uuid,
        recipient_id: Uuid,
        content: &str,
    ) -> Result<Message, AppError> {
        if sender_id == recipient_id {
            return Err(AppError::BadRequest(
                "cannot send a message to yourself".into(),
            ));
        }
        if content.is_empty() {
            return Err(AppError::BadRequest("message text must not be empty".into()));
        }

        let mut tx = db.begin().await?;

        let conversation = match Self::conversation_for_pair_tx(&mut tx, sender_id, recipient_id)
            .await?
        {
            Some(conversation) => conversation,
            None => {
                sqlx::query_as::<_, Conversation>(
                    r#"
                    INSERT INTO conversations (id, participant1_id, participant2_id)
                    VALUES ($1, $2, $3)
                    RETURNING *
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(sender_id)
                .bind(recipient_id)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        // The receiver is always "the other participant" relative to the
        // sender, regardless of which side created the conversation.
        let receiver_id = conversation
            .other_participant(sender_id)
            .ok_or(AppError::Forbidden)?;

        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, receiver_id, body, seen)
            VALUES ($1, $2, $3, $4, $5, FALSE)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(conversation.id)
        .bind(sender_id)
        .bind(receiver_id)
        .bind(content)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE conversations
            SET last_message = $2,
                last_message_sender_id = $3,
                last_message_receiver_id = $4,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(conversation.id)
        .bind(&message.body)
        .bind(sender_id)
        .bind(receiver_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(message)
    }

    /// Mark every unseen message from the other participant as seen.
    ///
    /// The conversation's `last_message_seen` flag flips when the last
    /// message was sent by the other participant, i.e. the caller is
    /// acknowledging a message addressed to them.
    pub async fn mark_seen(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<SeenUpdate, AppError> {
        let mut tx = db.begin().await?;

        // Locked for the whole update so the last-message check cannot run
        // against a summary a concurrent send is about to replace.
        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations WHERE id = $1 FOR UPDATE",
        )
        .bind(conversation_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound)?;
        let other_participant = conversation
            .other_participant(user_id)
            .ok_or(AppError::Forbidden)?;

        let result = sqlx::query(
            r#"
            UPDATE messages
            SET seen = TRUE
            WHERE conversation_id = $1 AND sender_id = $2 AND seen = FALSE
            "#,
        )
        .bind(conversation_id)
        .bind(other_participant)
        .execute(&mut *tx)
        .await?;
        let rows_affected = result.rows_affected();

        if conversation.last_message_sender_id == Some(other_participant) {
            sqlx::query("UPDATE conversations SET last_message_seen = TRUE WHERE id = $1")
                .bind(conversation_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            %conversation_id,
            %user_id,
            rows_affected,
            "marked messages as seen"
        );

        Ok(SeenUpdate {
            rows_affected,
            other_participant,
        })
    }

    /// Hide the caller's side of a conversation: null their reference on
    /// every message and on the conversation summary. Rows are never
    /// deleted and the counterpart's view is unaffected.
    pub async fn clear_conversation(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        let conversation = Self::conversation_by_id(db, conversation_id).await?;
        if !conversation.has_participant(user_id) {
            return Err(AppError::Forbidden);
        }

        let mut tx = db.begin().await?;

        sqlx::query(
            "UPDATE messages SET receiver_id = NULL WHERE conversation_id = $1 AND receiver_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE messages SET sender_id = NULL WHERE conversation_id = $1 AND sender_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE conversations
            SET last_message_sender_id = CASE
                    WHEN last_message_sender_id = $2 THEN NULL
                    ELSE last_message_sender_id
                END,
                last_message_receiver_id = CASE
                    WHEN last_message_receiver_id = $2 THEN NULL
                    ELSE last_message_receiver_id
                END
            WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// The conversation with `other_user_id` plus the messages the caller
    /// has not cleared, oldest first.
    pub async fn get_messages(
        db: &Pool<Postgres>,
        user_id: Uuid,
        other_user_id: Uuid,
    ) -> Result<(Conversation, Vec<Message>), AppError> {
        let conversation = Self::conversation_for_pair(db, user_id, other_user_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1 AND (sender_id = $2 OR receiver_id = $2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(conversation.id)
        .bind(user_id)
        .fetch_all(db)
        .await?;

        Ok((conversation, messages))
    }

    /// Every conversation the caller participates in, most recently
    /// updated first.
    pub async fn get_conversations(
        db: &Pool<Postgres>,
        user_id: Uuid,
    ) -> Result<Vec<Conversation>, AppError> {
        let conversations = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT * FROM conversations
            WHERE participant1_id = $1 OR participant2_id = $1
            ORDER BY updated_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(conversations)
    }

    async fn conversation_by_id(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
    ) -> Result<Conversation, AppError> {
        sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .fetch_optional(db)
            .await?
            .ok_or(AppError::NotFound)
    }

    async fn conversation_for_pair(
        db: &Pool<Postgres>,
        a: Uuid,
        b: Uuid,
    ) -> Result<Option<Conversation>, AppError> {
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT * FROM conversations
            WHERE (participant1_id = $1 AND participant2_id = $2)
               OR (participant1_id = $2 AND participant2_id = $1)
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_optional(db)
        .await?;
        Ok(conversation)
    }

    async fn conversation_for_pair_tx(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        a: Uuid,
        b: Uuid,
    ) -> Result<Option<Conversation>, AppError> {
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT * FROM conversations
            WHERE (participant1_id = $1 AND participant2_id = $2)
               OR (participant1_id = $2 AND participant2_id = $1)
            FOR UPDATE
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(conversation)
    }
}
