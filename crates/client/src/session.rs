//! Session contract and registry.
//!
//! Sessions are created elsewhere and register themselves with the
//! connection that carries them. The connection only needs two things from a
//! session: its back-reference ([`SessionOwner`]) and a way to close it.
//! Closing a session must remove it from the registry, which is what makes
//! the drain loop in `disconnect` terminate.

use std::sync::Arc;

use downcast_rs::{DowncastSync, impl_downcast};
use futures_util::future::join_all;
use parking_lot::Mutex;

use crate::channel::BoxFuture;
use crate::connection::{ClientConnection, ConnectionId, WeakClientConnection};
use crate::error::{Error, Result};

/// An application session multiplexed over the connection's secure channel.
pub trait Session: DowncastSync {
    /// Back-reference to the owning connection.
    fn owner(&self) -> &SessionOwner;

    /// Closes the session.
    ///
    /// Implementations must call
    /// [`ClientConnection::remove_session`] before resolving, whether or not
    /// the close succeeded.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

impl_downcast!(sync Session);

/// Back-reference slot embedded in every session.
#[derive(Debug, Default)]
pub struct SessionOwner {
    connection: Mutex<Option<WeakClientConnection>>,
}

impl SessionOwner {
    pub fn new() -> Self {
        Self::default()
    }

    /// The owning connection, if bound and still alive.
    pub fn connection(&self) -> Option<ClientConnection> {
        self.connection.lock().as_ref().and_then(|c| c.upgrade())
    }

    /// Id of the connection this slot is bound to, alive or not.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.lock().as_ref().map(|c| c.id())
    }

    pub fn is_bound(&self) -> bool {
        self.connection.lock().is_some()
    }

    pub(crate) fn bind(&self, connection: &ClientConnection) {
        *self.connection.lock() = Some(connection.downgrade());
    }
}

fn same_session(a: &Arc<dyn Session>, b: &dyn Session) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), b as *const dyn Session)
}

/// Sessions currently registered with one connection.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: Mutex<Vec<Arc<dyn Session>>>,
    /// Held for the whole of a drain so at most one runs at a time.
    draining: tokio::sync::Mutex<()>,
}

impl SessionRegistry {
    /// # Panics
    ///
    /// If the session belongs to another connection or is already registered.
    pub fn add(&self, session: Arc<dyn Session>, connection: &ClientConnection) {
        if let Some(owner) = session.owner().connection_id() {
            assert_eq!(
                owner,
                connection.id(),
                "session is bound to connection {owner}, cannot register with {}",
                connection.id()
            );
        }

        let mut sessions = self.sessions.lock();
        assert!(
            !sessions.iter().any(|s| same_session(s, session.as_ref())),
            "session registered twice with connection {}",
            connection.id()
        );
        session.owner().bind(connection);
        sessions.push(session);
    }

    /// Returns false if the session was not registered.
    pub fn remove(&self, session: &dyn Session) -> bool {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|s| !same_session(s, session));
        sessions.len() != before
    }

    pub fn contains(&self, session: &dyn Session) -> bool {
        self.sessions.lock().iter().any(|s| same_session(s, session))
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn Session>> {
        self.sessions.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Closes every registered session concurrently and waits for all of them.
    ///
    /// Drains are serialized: a caller arriving while another drain is in
    /// flight waits for it, then closes only what is still registered, so no
    /// session is closed twice.
    ///
    /// Only the first failure is returned; the rest are logged and dropped.
    ///
    /// # Panics
    ///
    /// If a drained session is still registered after its close settled.
    pub async fn drain(&self) -> Result<()> {
        let _draining = self.draining.lock().await;
        let pending = self.snapshot();
        if pending.is_empty() {
            return Ok(());
        }

        tracing::debug!(sessions = pending.len(), "Closing pending sessions");
        let results = join_all(pending.iter().map(|session| session.close())).await;

        let mut first_error: Option<Error> = None;
        for result in results {
            if let Err(err) = result {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    tracing::debug!(error = %err, "Discarding additional session close failure");
                }
            }
        }

        for session in &pending {
            assert!(
                !self.contains(session.as_ref()),
                "session still registered after close; Session::close must deregister"
            );
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
