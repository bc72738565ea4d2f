use crate::error::AppError;
use crate::middleware::auth::AuthedUser;
use crate::models::{Conversation, Message};
use crate::services::ChatService;
use crate::state::AppState;
use crate::websocket::message_types::NewMessagePayload;
use crate::websocket::WsOutboundEvent;
use actix_web::{get, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub recipient_id: Uuid,
    pub content: String,
}

#[post("/api/v1/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: AuthedUser,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let message =
        ChatService::send_message(&state.db, user.id, body.recipient_id, &body.content).await?;

    // The row is committed; the live push is a best-effort notification and
    // its outcome never changes the response.
    let delivered = state.registry.send_to_user(
        body.recipient_id,
        &WsOutboundEvent::NewMessage {
            message: NewMessagePayload {
                id: message.id,
                text: message.body.clone(),
                sender_id: message.sender_id,
                conversation_id: message.conversation_id,
                seen: message.seen,
                created_at: message.created_at,
            },
        },
    );
    if !delivered {
        tracing::debug!(recipient_id = %body.recipient_id, "recipient offline, skipping push");
    }

    Ok(HttpResponse::Ok().json(&message))
}

#[derive(Serialize)]
pub struct MessagesResponse {
    pub success: bool,
    pub messages: Vec<Message>,
    pub conversation: Conversation,
}

#[get("/api/v1/messages/{other_user_id}")]
pub async fn get_messages(
    state: web::Data<AppState>,
    user: AuthedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let (conversation, messages) =
        ChatService::get_messages(&state.db, user.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(MessagesResponse {
        success: true,
        messages,
        conversation,
    }))
}

/// Conversation as seen by one participant: the last-message text is hidden
/// once that participant has cleared their side.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
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

impl ConversationSummary {
    pub fn for_user(conversation: Conversation, user_id: Uuid) -> Self {
        let last_message = if conversation.last_message_visible_to(user_id) {
            conversation.last_message
        } else {
            None
        };
        Self {
            id: conversation.id,
            participant1_id: conversation.participant1_id,
            participant2_id: conversation.participant2_id,
            last_message,
            last_message_sender_id: conversation.last_message_sender_id,
            last_message_receiver_id: conversation.last_message_receiver_id,
            last_message_seen: conversation.last_message_seen,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct ConversationsResponse {
    pub success: bool,
    pub conversations: Vec<ConversationSummary>,
}

#[get("/api/v1/conversations")]
pub async fn get_conversations(
    state: web::Data<AppState>,
    user: AuthedUser,
) -> Result<HttpResponse, AppError> {
    let conversations = ChatService::get_conversations(&state.db, user.id)
        .await?
        .into_iter()
        .map(|c| ConversationSummary::for_user(c, user.id))
        .collect();
    Ok(HttpResponse::Ok().json(ConversationsResponse {
        success: true,
        conversations,
    }))
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
}

#[post("/api/v1/conversations/{conversation_id}/clear")]
pub async fn clear_conversation(
    state: web::Data<AppState>,
    user: AuthedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    ChatService::clear_conversation(&state.db, path.into_inner(), user.id).await?;
    Ok(HttpResponse::Ok().json(StatusResponse {
        success: true,
        message: "conversation cleared".into(),
    }))
}
