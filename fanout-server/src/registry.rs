//! Connection registry.
//!
//! Tracks live connections, the identity each session bound with JOIN, and the
//! order in which sessions connected. All maps are [`DashMap`]s so connection
//! tasks can register, bind and broadcast concurrently without an outer lock.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::envelope::{Outbound, now_millis};

/// Identity used for sessions that have not bound one.
pub const ANONYMOUS: &str = "anonymous";

/// Server-assigned identifier of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a live transport channel.
///
/// The transport owns the receiving half of the queue; once it is dropped the
/// connection counts as closed.
#[derive(Debug, Clone)]
pub struct Connection {
    id: SessionId,
    sender: mpsc::Sender<Outbound>,
}

impl Connection {
    pub fn new(id: SessionId, sender: mpsc::Sender<Outbound>) -> Self {
        Self { id, sender }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Queues an envelope without waiting.
    pub fn send(&self, envelope: Outbound) -> SendOutcome {
        match self.sender.try_send(envelope) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session = %self.id, "outbound queue full, dropping envelope");
                SendOutcome::ChannelFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(session = %self.id, "outbound queue closed");
                SendOutcome::ChannelClosed
            }
        }
    }
}

/// Result of delivering one envelope to one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    NotConnected,
    ChannelFull,
    ChannelClosed,
}

impl SendOutcome {
    pub fn is_sent(self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

pub struct ConnectionRegistry {
    connections: DashMap<SessionId, Connection>,
    identities: DashMap<SessionId, String>,
    join_order: DashMap<SessionId, i64>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            identities: DashMap::new(),
            join_order: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_session_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Adds a connection and stamps its join order with the current time.
    pub fn register(&self, connection: Connection) {
        self.register_at(connection, now_millis());
    }

    /// Adds a connection with an explicit join timestamp in epoch milliseconds.
    ///
    /// The join order is written before the connection so that anything that
    /// can see the connection can also rank it.
    pub fn register_at(&self, connection: Connection, joined_at: i64) {
        let id = connection.id();
        self.join_order.insert(id, joined_at);
        if self.connections.insert(id, connection).is_some() {
            warn!(session = %id, "replaced existing connection registration");
        } else {
            debug!(session = %id, "registered connection");
        }
    }

    /// Drops every trace of a session.
    pub fn unregister(&self, session: SessionId) -> Option<Connection> {
        self.identities.remove(&session);
        self.join_order.remove(&session);
        let removed = self.connections.remove(&session).map(|(_, connection)| connection);
        if removed.is_some() {
            debug!(%session, "unregistered connection");
        }
        removed
    }

    pub fn bind_identity(&self, session: SessionId, identity: impl Into<String>) {
        self.identities.insert(session, identity.into());
    }

    pub fn unbind_identity(&self, session: SessionId) -> Option<String> {
        self.identities.remove(&session).map(|(_, identity)| identity)
    }

    /// Removes the session from admin succession without closing it.
    pub fn forget_join_order(&self, session: SessionId) {
        self.join_order.remove(&session);
    }

    pub fn lookup_identity(&self, session: SessionId) -> Option<String> {
        self.identities.get(&session).map(|entry| entry.value().clone())
    }

    /// Finds the session bound to `identity`.
    ///
    /// Identities are not unique; the earliest joined match wins.
    pub fn lookup_session_by_identity(&self, identity: &str) -> Option<SessionId> {
        self.identities
            .iter()
            .filter(|entry| entry.value() == identity)
            .map(|entry| *entry.key())
            .min_by_key(|session| self.rank(*session))
    }

    /// Bound identities, earliest joined first.
    pub fn list_identities(&self) -> Vec<String> {
        let mut bound: Vec<(SessionId, String)> = self
            .identities
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        bound.sort_by_key(|(session, _)| self.rank(*session));
        bound.into_iter().map(|(_, identity)| identity).collect()
    }

    pub fn is_open(&self, session: SessionId) -> bool {
        self.connections
            .get(&session)
            .is_some_and(|connection| connection.is_open())
    }

    /// Point-in-time copy of the join order map.
    pub fn join_order(&self) -> Vec<(SessionId, i64)> {
        self.join_order
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn send_to(&self, session: SessionId, envelope: Outbound) -> SendOutcome {
        // Clone the handle out so no shard lock is held while sending.
        let connection = match self.connections.get(&session) {
            Some(entry) => entry.value().clone(),
            None => {
                debug!(%session, "recipient not connected");
                return SendOutcome::NotConnected;
            }
        };
        connection.send(envelope)
    }

    /// Delivers to every open connection except `exclude`. Returns how many
    /// queues accepted the envelope.
    pub fn broadcast(&self, envelope: &Outbound, exclude: Option<SessionId>) -> usize {
        let recipients: Vec<Connection> = self
            .connections
            .iter()
            .filter(|entry| Some(*entry.key()) != exclude)
            .map(|entry| entry.value().clone())
            .collect();

        let mut delivered = 0;
        for connection in recipients.iter().filter(|connection| connection.is_open()) {
            if connection.send(envelope.clone()).is_sent() {
                delivered += 1;
            }
        }
        delivered
    }

    fn rank(&self, session: SessionId) -> (i64, SessionId) {
        let joined = self
            .join_order
            .get(&session)
            .map(|entry| *entry.value())
            .unwrap_or(i64::MAX);
        (joined, session)
    }
}
