//! Preconditions checked before a request leaves the client.

use exchange_protocol::MessageKind;

use crate::error::{ClientError, Result};
use crate::session::Session;

pub trait RequestPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// `Err` keeps the request from being sent.
    fn check(&self, kind: MessageKind, session: &Session) -> Result<()>;
}

/// Only registration and login may be sent before the gateway acknowledged
/// a login.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoginRequired;

impl RequestPolicy for LoginRequired {
    fn name(&self) -> &str {
        "LoginRequired"
    }

    fn check(&self, kind: MessageKind, session: &Session) -> Result<()> {
        match kind {
            MessageKind::RegisterReq | MessageKind::LoginReq => Ok(()),
            _ if session.is_logged_in() => Ok(()),
            _ => Err(ClientError::NotLoggedIn),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl RequestPolicy for AllowAll {
    fn name(&self) -> &str {
        "AllowAll"
    }

    fn check(&self, _kind: MessageKind, _session: &Session) -> Result<()> {
        Ok(())
    }
}

/// Login is still required, and order entry is refused outright.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadOnly;

impl RequestPolicy for ReadOnly {
    fn name(&self) -> &str {
        "ReadOnly"
    }

    fn check(&self, kind: MessageKind, session: &Session) -> Result<()> {
        match kind {
            MessageKind::PlaceOrder | MessageKind::CancelOrder => {
                Err(ClientError::Rejected(format!("{} on a read-only client", kind)))
            }
            _ => LoginRequired.check(kind, session),
        }
    }
}
