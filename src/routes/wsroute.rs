use crate::services::ChatService;
use crate::state::AppState;
use crate::websocket::message_types::{self, TextEventPayload, WsInboundEvent, WsOutboundEvent};
use crate::websocket::{ConnectionRegistry, OutboundFrame, SessionId};
use actix::{Actor, ActorContext, AsyncContext, Handler, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use sqlx::{Pool, Postgres};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Keep-alive ping interval.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
/// Connection dropped when no client traffic (pong or frame) arrives within
/// this window.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

// The identity is taken as a raw string so that a malformed value is
// rejected over the socket like a missing one, instead of failing query
// extraction with a plain 400 before the upgrade.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// A handshake identity is usable only when present and a well-formed UUID.
fn bind_user_id(raw: Option<&str>) -> Option<Uuid> {
    raw.and_then(|s| Uuid::parse_str(s).ok())
}

#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    params: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let session = WsSession::new(
        params.into_inner().user_id,
        state.registry.clone(),
        state.db.clone(),
    );
    ws::start(session, &req, stream)
}

struct WsSession {
    /// Raw `userId` query parameter; validated in `started`.
    requested_user: Option<String>,
    /// Bound identity; stays `None` when the handshake carried no usable
    /// `userId` and the session terminates without ever registering.
    user_id: Option<Uuid>,
    session_id: SessionId,
    registry: ConnectionRegistry,
    db: Pool<Postgres>,
    hb: Instant,
}

impl WsSession {
    fn new(requested_user: Option<String>, registry: ConnectionRegistry, db: Pool<Postgres>) -> Self {
        Self {
            requested_user,
            user_id: None,
            session_id: SessionId::new(),
            registry,
            db,
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::info!(user_id = ?act.user_id, "websocket heartbeat timed out, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_frame(&self, text: &str) {
        let Some(bound_user) = self.user_id else {
            return;
        };
        match message_types::parse_inbound(text) {
            Ok(Some(event)) => self.dispatch(bound_user, event),
            Ok(None) => tracing::warn!(%bound_user, "ignoring unknown websocket message type"),
            Err(e) => tracing::warn!(%bound_user, error = %e, "malformed websocket envelope"),
        }
    }

    fn dispatch(&self, bound_user: Uuid, event: WsInboundEvent) {
        let db = self.db.clone();
        let registry = self.registry.clone();
        match event {
            WsInboundEvent::MarkMessagesAsSeen {
                conversation_id,
                user_id,
            } => {
                if user_id != bound_user {
                    tracing::warn!(
                        %bound_user,
                        claimed = %user_id,
                        "seen event identity does not match connection"
                    );
                    return;
                }
                actix::spawn(async move {
                    match ChatService::mark_seen(&db, conversation_id, user_id).await {
                        Ok(update) if update.rows_affected > 0 => {
                            registry.send_to_user(
                                update.other_participant,
                                &WsOutboundEvent::MessagesSeen { conversation_id },
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, %conversation_id, "mark seen failed");
                        }
                    }
                });
            }
            WsInboundEvent::Text {
                text,
                sender_id,
                recipient_id,
                ..
            } => {
                if sender_id != bound_user {
                    tracing::warn!(
                        %bound_user,
                        claimed = %sender_id,
                        "text event identity does not match connection"
                    );
                    return;
                }
                actix::spawn(async move {
                    // Persist first; the forwarded frame carries the stored
                    // row's timestamp and is only a delivery hint on top of it.
                    match ChatService::send_message(&db, sender_id, recipient_id, &text).await {
                        Ok(message) => {
                            let delivered = registry.send_to_user(
                                recipient_id,
                                &WsOutboundEvent::Text {
                                    payload: TextEventPayload {
                                        text: message.body.clone(),
                                        sender_id,
                                        conversation_id: message.conversation_id,
                                        created_at: message.created_at,
                                    },
                                },
                            );
                            if !delivered {
                                tracing::debug!(%recipient_id, "recipient offline, message persisted only");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to persist websocket text message");
                        }
                    }
                });
            }
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let Some(user_id) = bind_user_id(self.requested_user.as_deref()) else {
            if let Some(frame) = (WsOutboundEvent::Error {
                error: "valid userId query parameter required".into(),
            })
            .to_frame()
            {
                ctx.text(frame);
            }
            ctx.stop();
            return;
        };
        self.user_id = Some(user_id);

        self.registry
            .register(user_id, self.session_id, ctx.address().recipient());
        self.hb(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(user_id) = self.user_id {
            self.registry.unregister(user_id, self.session_id);
        }
    }
}

impl Handler<OutboundFrame> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: OutboundFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.handle_frame(&text);
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("binary websocket frames not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(error = %e, "websocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}
