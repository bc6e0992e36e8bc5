//! Admin election and succession.
//!
//! Exactly one session holds admin status at a time. The first session to
//! JOIN while nobody is admin takes the role; when the admin leaves, the role
//! passes to the oldest surviving connection. Ties on the join timestamp are
//! broken by the lower [`SessionId`], which follows connection order.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::{
    envelope::Outbound,
    registry::{ANONYMOUS, ConnectionRegistry, SessionId},
};

/// What happened to the admin role when a session departed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Succession {
    /// The departing session was not the admin.
    Unchanged,
    Promoted { session: SessionId, identity: String },
    /// No other open session was left to take over.
    Vacated,
}

#[derive(Debug, Default)]
pub struct AdminManager {
    current: Mutex<Option<SessionId>>,
}

impl AdminManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `session` admin if nobody holds the role. Returns whether it did.
    pub fn try_claim_first(
        &self,
        registry: &ConnectionRegistry,
        session: SessionId,
        identity: &str,
    ) -> bool {
        {
            let mut current = self.lock();
            if current.is_some() {
                return false;
            }
            *current = Some(session);
        }

        info!(%session, identity, "first user is now the admin");
        registry.send_to(session, Outbound::system_with_admin("You are now the admin", true));
        true
    }

    /// Hands the role on if `departing` is the admin.
    pub fn succeed(&self, registry: &ConnectionRegistry, departing: SessionId) -> Succession {
        let next = {
            let mut current = self.lock();
            if *current != Some(departing) {
                return Succession::Unchanged;
            }

            let next = registry
                .join_order()
                .into_iter()
                .filter(|(session, _)| *session != departing && registry.is_open(*session))
                .min_by_key(|(session, joined)| (*joined, *session))
                .map(|(session, _)| session);
            *current = next;
            next
        };

        let Some(session) = next else {
            info!(%departing, "no users left, admin reset");
            return Succession::Vacated;
        };

        let identity = registry
            .lookup_identity(session)
            .unwrap_or_else(|| ANONYMOUS.to_string());
        info!(%departing, %session, %identity, "admin role passed on");

        registry.send_to(session, Outbound::system_with_admin("You are now the admin", true));
        registry.broadcast(
            &Outbound::system(format!("{identity} is now the admin")),
            Some(session),
        );

        Succession::Promoted { session, identity }
    }

    pub fn is_admin(&self, session: SessionId) -> bool {
        *self.lock() == Some(session)
    }

    pub fn admin_session(&self) -> Option<SessionId> {
        *self.lock()
    }

    /// Identity bound by the admin session, if there is an admin and it has joined.
    pub fn admin_identity(&self, registry: &ConnectionRegistry) -> Option<String> {
        self.admin_session()
            .and_then(|session| registry.lookup_identity(session))
    }

    fn lock(&self) -> MutexGuard<'_, Option<SessionId>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
