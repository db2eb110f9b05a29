use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// Per-client connection state, shared between the caller threads and the
/// receive loop.
#[derive(Debug)]
pub struct Session {
    server_address: String,
    client_ref: Uuid,
    sender_identity: RwLock<Option<String>>,
    logged_in: AtomicBool,
    closed: AtomicBool,
}

impl Session {
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            client_ref: Uuid::new_v4(),
            sender_identity: RwLock::new(None),
            logged_in: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    /// Random reference identifying this client instance.
    pub fn client_ref(&self) -> Uuid {
        self.client_ref
    }

    /// Account the gateway acknowledged on the last login, if any.
    pub fn sender_identity(&self) -> Option<String> {
        self.sender_identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Only the receive loop calls this, after decoding a login acknowledgement.
    pub(crate) fn mark_logged_in(&self, account_id: &str) {
        *self
            .sender_identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(account_id.to_string());
        self.logged_in.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if the session was already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        self.closed.swap(true, Ordering::SeqCst)
    }
}
