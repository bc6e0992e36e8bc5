//! Message classification and routing.
//!
//! [`MessageRouter`] is shared by every connection task. It owns no mutable
//! state of its own: session data lives in the [`ConnectionRegistry`] and the
//! admin role in the [`AdminManager`], so handlers for different sessions run
//! fully in parallel.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    admin::AdminManager,
    bot::{BotDispatcher, ServerSnapshot},
    envelope::{Inbound, Outbound, ProtocolError, decode_inbound, strip_prefix_ignore_case},
    registry::{ANONYMOUS, Connection, ConnectionRegistry, SessionId},
};

pub const ADMIN_DM_PREFIX: &str = "@serveradmin";

pub struct MessageRouter {
    registry: ConnectionRegistry,
    admin: AdminManager,
    bots: BotDispatcher,
    started_at: DateTime<Utc>,
}

impl MessageRouter {
    pub fn new(bots: BotDispatcher) -> Self {
        info!(commands = ?bots.command_names(), "registered bot commands");
        Self {
            registry: ConnectionRegistry::new(),
            admin: AdminManager::new(),
            bots,
            started_at: Utc::now(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn admin(&self) -> &AdminManager {
        &self.admin
    }

    /// Registers a new connection and sends it the handshake.
    pub fn connect(&self, sender: mpsc::Sender<Outbound>) -> SessionId {
        let session = self.registry.next_session_id();
        self.registry.register(Connection::new(session, sender));
        info!(%session, "connection established");
        self.registry.send_to(session, Outbound::welcome(session));
        session
    }

    /// Decodes and routes one raw frame. Malformed input is answered with an
    /// ERROR to the sender only.
    pub fn handle_text(&self, session: SessionId, payload: &str) {
        debug!(%session, payload, "received frame");
        match decode_inbound(payload) {
            Ok(message) => self.handle(session, message),
            Err(err) => {
                warn!(%session, error = %err, "rejected inbound frame");
                let reply = match err {
                    ProtocolError::UnknownType(_) => err.to_string(),
                    other => format!("Error processing message: {other}"),
                };
                self.registry.send_to(session, Outbound::error(reply));
            }
        }
    }

    pub fn handle(&self, session: SessionId, message: Inbound) {
        match message {
            Inbound::Join { user_id } => {
                self.handle_join(session, user_id.unwrap_or_else(|| ANONYMOUS.to_string()))
            }
            Inbound::Chat {
                content,
                recipient_id,
            } => self.handle_chat(session, &content, recipient_id.as_deref()),
            Inbound::Leave => self.handle_leave(session),
            Inbound::Ping => {
                self.registry.send_to(session, Outbound::pong());
            }
        }
    }

    /// Transport closed without an explicit LEAVE.
    pub fn disconnect(&self, session: SessionId) {
        info!(%session, "connection closed");
        if let Some(identity) = self.registry.lookup_identity(session) {
            self.registry
                .broadcast(&Outbound::disconnect_notice(&identity), Some(session));
        }
        self.withdraw(session);
        self.registry.unregister(session);
    }

    /// Tells every open session the server is going away.
    pub fn announce_shutdown(&self) {
        info!("server shutting down");
        self.registry
            .broadcast(&Outbound::system("server shutting down"), None);
    }

    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            admin_identity: self.admin.admin_identity(&self.registry),
            started_at: self.started_at,
            active_users: self.registry.list_identities(),
        }
    }

    fn handle_join(&self, session: SessionId, identity: String) {
        self.registry.bind_identity(session, identity.clone());
        info!(%session, %identity, "user joined");

        self.admin.try_claim_first(&self.registry, session, &identity);
        let is_admin = self.admin.is_admin(session);

        self.registry
            .broadcast(&Outbound::join_notice(&identity, is_admin), Some(session));
        self.registry.send_to(
            session,
            Outbound::join_ack(self.registry.list_identities(), is_admin),
        );
    }

    fn handle_chat(&self, session: SessionId, content: &str, recipient: Option<&str>) {
        let sender = self.identity_of(session);

        if let Some(body) = strip_prefix_ignore_case(content.trim(), ADMIN_DM_PREFIX) {
            self.route_admin_dm(session, &sender, body.trim());
            return;
        }

        if self.bots.is_command(content) {
            let reply = self
                .bots
                .dispatch(session, &sender, content, &self.snapshot());
            self.registry.send_to(session, Outbound::system(reply));
            return;
        }

        let message = Outbound::chat(&sender, content, recipient, self.admin.is_admin(session));
        debug!(%session, %sender, ?recipient, "chat message");

        match recipient {
            Some(target) => self.send_to_identity(target, message),
            None => {
                self.registry.broadcast(&message, Some(session));
            }
        }
    }

    fn route_admin_dm(&self, session: SessionId, sender: &str, body: &str) {
        if body.is_empty() {
            self.reply_error(session, "message to admin cannot be empty");
            return;
        }

        let Some(admin) = self.admin.admin_session() else {
            self.reply_error(session, "no admin online");
            return;
        };

        if admin == session {
            self.reply_error(session, "cannot message yourself");
            return;
        }

        let admin_identity = self.registry.lookup_identity(admin);
        info!(%session, %sender, ?admin_identity, "direct message to admin");

        let delivered = Outbound::admin_dm(sender, admin_identity.as_deref(), body, false);
        if self.registry.is_open(admin) {
            self.registry.send_to(admin, delivered);
        } else {
            warn!(%admin, "admin session is not open");
        }

        let echo = Outbound::admin_dm(sender, admin_identity.as_deref(), body, true);
        self.registry.send_to(session, echo);
    }

    fn handle_leave(&self, session: SessionId) {
        let identity = self.identity_of(session);
        info!(%session, %identity, "user left");

        self.registry
            .broadcast(&Outbound::leave_notice(&identity), Some(session));
        self.withdraw(session);
        self.registry.unbind_identity(session);
    }

    /// Takes `session` out of admin candidacy, then hands the role on if it
    /// held it. A concurrent succession can then never pick `session`.
    fn withdraw(&self, session: SessionId) {
        self.registry.forget_join_order(session);
        self.admin.succeed(&self.registry, session);
    }

    fn send_to_identity(&self, identity: &str, message: Outbound) {
        match self.registry.lookup_session_by_identity(identity) {
            Some(target) if self.registry.is_open(target) => {
                self.registry.send_to(target, message);
            }
            _ => warn!(recipient = identity, "user not found or session is closed"),
        }
    }

    fn reply_error(&self, session: SessionId, message: &str) {
        self.registry.send_to(session, Outbound::error(message));
    }

    fn identity_of(&self, session: SessionId) -> String {
        self.registry
            .lookup_identity(session)
            .unwrap_or_else(|| ANONYMOUS.to_string())
    }
}
