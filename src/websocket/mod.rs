use actix::prelude::{Message, Recipient};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub mod message_types;

pub use message_types::{WsInboundEvent, WsOutboundEvent};

/// One serialized envelope on its way to a connection's mailbox.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct OutboundFrame(pub String);

/// Unique identifier for one websocket session.
///
/// Registration is keyed by user id, but unregistration compares session ids
/// so a stale connection's teardown cannot evict the connection that
/// replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

struct SessionHandle {
    session_id: SessionId,
    recipient: Recipient<OutboundFrame>,
}

/// Process-wide map from user identity to the one live connection handle.
///
/// A single mutex guards the map; the critical section covers only map
/// reads/mutation and snapshotting. All delivery happens after the lock is
/// released, via non-blocking mailbox sends, so one slow or dead peer can
/// never stall registry callers or sibling deliveries.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<Uuid, SessionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `user_id` with a live connection, replacing any prior
    /// mapping for that identity, and broadcast the new presence set.
    pub fn register(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        recipient: Recipient<OutboundFrame>,
    ) {
        let snapshot = {
            let mut guard = self.inner.lock().expect("connection registry lock poisoned");
            let replaced = guard
                .insert(
                    user_id,
                    SessionHandle {
                        session_id,
                        recipient,
                    },
                )
                .is_some();
            if replaced {
                tracing::debug!(%user_id, "replaced existing connection for user");
            }
            Self::presence_snapshot(&guard)
        };
        tracing::info!(%user_id, online = snapshot.0.len(), "user connected");
        Self::deliver_presence(snapshot);
    }

    /// Remove the mapping for `user_id` if it still belongs to `session_id`,
    /// then broadcast the new presence set. No-op for an absent or
    /// already-replaced mapping.
    pub fn unregister(&self, user_id: Uuid, session_id: SessionId) {
        let snapshot = {
            let mut guard = self.inner.lock().expect("connection registry lock poisoned");
            match guard.get(&user_id) {
                Some(handle) if handle.session_id == session_id => {
                    guard.remove(&user_id);
                    Some(Self::presence_snapshot(&guard))
                }
                _ => None,
            }
        };
        if let Some(snapshot) = snapshot {
            tracing::info!(%user_id, online = snapshot.0.len(), "user disconnected");
            Self::deliver_presence(snapshot);
        }
    }

    /// Push one event to `user_id` if connected. Returns whether a live
    /// handle existed; enqueue failures are logged and swallowed, the peer's
    /// own teardown path cleans up its registration.
    pub fn send_to_user(&self, user_id: Uuid, event: &WsOutboundEvent) -> bool {
        let recipient = {
            let guard = self.inner.lock().expect("connection registry lock poisoned");
            guard.get(&user_id).map(|h| h.recipient.clone())
        };
        let Some(recipient) = recipient else {
            return false;
        };
        if let Some(frame) = event.to_frame() {
            if let Err(e) = recipient.try_send(OutboundFrame(frame)) {
                tracing::warn!(%user_id, error = %e, "failed to enqueue event for user");
            }
        }
        true
    }

    /// Snapshot of currently connected user identities.
    pub fn online_users(&self) -> Vec<Uuid> {
        let guard = self.inner.lock().expect("connection registry lock poisoned");
        guard.keys().copied().collect()
    }

    fn presence_snapshot(
        guard: &HashMap<Uuid, SessionHandle>,
    ) -> (Vec<Uuid>, Vec<Recipient<OutboundFrame>>) {
        let users: Vec<Uuid> = guard.keys().copied().collect();
        let recipients: Vec<_> = guard.values().map(|h| h.recipient.clone()).collect();
        (users, recipients)
    }

    /// Deliver `ONLINE_USERS` to every handle in the snapshot, each attempt
    /// independent of the others.
    fn deliver_presence((users, recipients): (Vec<Uuid>, Vec<Recipient<OutboundFrame>>)) {
        let event = WsOutboundEvent::OnlineUsers { users };
        let Some(frame) = event.to_frame() else {
            return;
        };
        for recipient in recipients {
            if let Err(e) = recipient.try_send(OutboundFrame(frame.clone())) {
                tracing::warn!(error = %e, "failed to push presence update");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix::prelude::*;
    use std::time::Duration;

    struct Collector {
        frames: Arc<Mutex<Vec<String>>>,
    }

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Handler<OutboundFrame> for Collector {
        type Result = ();

        fn handle(&mut self, msg: OutboundFrame, _ctx: &mut Self::Context) {
            self.frames.lock().unwrap().push(msg.0);
        }
    }

    #[derive(Message)]
    #[rtype(result = "()")]
    struct Shutdown;

    impl Handler<Shutdown> for Collector {
        type Result = ();

        fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) {
            ctx.stop();
        }
    }

    fn collector() -> (Addr<Collector>, Arc<Mutex<Vec<String>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let addr = Collector {
            frames: frames.clone(),
        }
        .start();
        (addr, frames)
    }

    async fn drain_mailboxes() {
        actix_rt::time::sleep(Duration::from_millis(20)).await;
    }

    #[actix_rt::test]
    async fn second_registration_replaces_the_first() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (old_addr, old_frames) = collector();
        let (new_addr, new_frames) = collector();

        registry.register(user, SessionId::new(), old_addr.recipient());
        registry.register(user, SessionId::new(), new_addr.recipient());
        drain_mailboxes().await;

        assert_eq!(registry.online_users(), vec![user]);

        let before_old = old_frames.lock().unwrap().len();
        assert!(registry.send_to_user(
            user,
            &WsOutboundEvent::MessagesSeen {
                conversation_id: Uuid::new_v4()
            }
        ));
        drain_mailboxes().await;

        // Only the newest handle receives direct sends.
        assert_eq!(old_frames.lock().unwrap().len(), before_old);
        let frames = new_frames.lock().unwrap();
        assert!(frames.iter().any(|f| f.contains("MESSAGES_SEEN")));
    }

    #[actix_rt::test]
    async fn stale_teardown_does_not_evict_replacement() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (addr, _frames) = collector();

        let stale = SessionId::new();
        let fresh = SessionId::new();
        registry.register(user, stale, addr.clone().recipient());
        registry.register(user, fresh, addr.clone().recipient());

        registry.unregister(user, stale);
        assert_eq!(registry.online_users(), vec![user]);

        registry.unregister(user, fresh);
        assert!(registry.online_users().is_empty());
    }

    #[actix_rt::test]
    async fn presence_broadcast_carries_full_snapshot() {
        let registry = ConnectionRegistry::new();
        let (user_a, user_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (addr_a, frames_a) = collector();
        let (addr_b, _frames_b) = collector();

        registry.register(user_a, SessionId::new(), addr_a.recipient());
        registry.register(user_b, SessionId::new(), addr_b.recipient());
        drain_mailboxes().await;

        let frames = frames_a.lock().unwrap();
        let last: serde_json::Value = serde_json::from_str(frames.last().unwrap()).unwrap();
        assert_eq!(last["type"], "ONLINE_USERS");
        let users: Vec<Uuid> = serde_json::from_value(last["users"].clone()).unwrap();
        assert!(users.contains(&user_a) && users.contains(&user_b));
        assert_eq!(users.len(), 2);
    }

    #[actix_rt::test]
    async fn dead_handle_does_not_poison_sibling_deliveries() {
        let registry = ConnectionRegistry::new();
        let (dead_user, live_user) = (Uuid::new_v4(), Uuid::new_v4());
        let (dead_addr, _dead_frames) = collector();
        let (live_addr, live_frames) = collector();

        registry.register(dead_user, SessionId::new(), dead_addr.clone().recipient());
        registry.register(live_user, SessionId::new(), live_addr.recipient());

        dead_addr.do_send(Shutdown);
        drain_mailboxes().await;

        // The mapping still exists until the connection's own teardown runs,
        // so the send targets a closed mailbox: logged, swallowed, reported
        // as connected.
        assert!(registry.send_to_user(
            dead_user,
            &WsOutboundEvent::MessagesSeen {
                conversation_id: Uuid::new_v4()
            }
        ));

        // A presence broadcast that includes the dead handle must still
        // reach the surviving peer.
        let before_live = live_frames.lock().unwrap().len();
        let third_user = Uuid::new_v4();
        let (third_addr, _third_frames) = collector();
        registry.register(third_user, SessionId::new(), third_addr.recipient());
        drain_mailboxes().await;

        let frames = live_frames.lock().unwrap();
        assert!(frames.len() > before_live);
        let last: serde_json::Value = serde_json::from_str(frames.last().unwrap()).unwrap();
        assert_eq!(last["type"], "ONLINE_USERS");
        let users: Vec<Uuid> = serde_json::from_value(last["users"].clone()).unwrap();
        assert!(users.contains(&live_user) && users.contains(&third_user));
    }

    #[actix_rt::test]
    async fn send_to_absent_user_reports_not_connected() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to_user(
            Uuid::new_v4(),
            &WsOutboundEvent::MessagesSeen {
                conversation_id: Uuid::new_v4()
            }
        ));
    }
}
