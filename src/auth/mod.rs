use crate::protocol::{read_greeting, read_userpass, AuthMethod, SOCKS_VERSION, USERPASS_VERSION};
use crate::session::SessionContext;
use crate::utils::error::{Result, SocklinkError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Sub-negotiation status bytes (RFC 1929)
const AUTH_SUCCEEDED: u8 = 0x00;
const AUTH_FAILED: u8 = 0x01;

/// Outcome of one checker turn. The session driver writes `response` to the
/// client in every case; `Denied` aborts the session after the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthTurn {
    /// More sub-negotiation turns follow.
    Pending(Vec<u8>),
    /// Handshake complete; the response is the final acknowledgement.
    Granted(Vec<u8>),
    /// The response carries the protocol-appropriate rejection.
    Denied(Vec<u8>),
}

/// Server-driven authentication handshake. The server holds one configured
/// checker and drives it once per session: `start` consumes the client's
/// opening bytes, then `next` runs while `start`/`next` return
/// [`AuthTurn::Pending`].
#[async_trait]
pub trait AuthChecker: Send + Sync {
    async fn start(&self, stream: &mut TcpStream, ctx: &mut SessionContext) -> Result<AuthTurn>;

    async fn next(&self, stream: &mut TcpStream, ctx: &mut SessionContext) -> Result<AuthTurn>;
}

/// Default checker: accepts clients that offer NO AUTHENTICATION REQUIRED.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuthChecker;

#[async_trait]
impl AuthChecker for NoAuthChecker {
    async fn start(&self, stream: &mut TcpStream, ctx: &mut SessionContext) -> Result<AuthTurn> {
        let methods = read_greeting(stream).await?;
        if methods.contains(&AuthMethod::NoAuth) {
            ctx.select_method(AuthMethod::NoAuth);
            ctx.grant(None);
            Ok(AuthTurn::Granted(vec![
                SOCKS_VERSION,
                AuthMethod::NoAuth as u8,
            ]))
        } else {
            warn!("Client offered no acceptable method: {:?}", methods);
            Ok(AuthTurn::Denied(vec![
                SOCKS_VERSION,
                AuthMethod::NoAcceptable as u8,
            ]))
        }
    }

    async fn next(&self, _stream: &mut TcpStream, _ctx: &mut SessionContext) -> Result<AuthTurn> {
        Err(SocklinkError::Protocol(
            "No sub-negotiation exists for the no-auth method".to_string(),
        ))
    }
}

/// Username/password checker (RFC 1929) backed by a credential table.
#[derive(Debug, Clone)]
pub struct PasswordChecker {
    users: HashMap<String, String>,
}

impl PasswordChecker {
    /// Checker accepting exactly one username/password pair.
    pub fn new(username: &str, password: &str) -> Self {
        let mut users = HashMap::new();
        users.insert(username.to_string(), password.to_string());
        Self { users }
    }

    /// Checker backed by a multi-user credential table.
    pub fn with_users(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    fn verify(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .map(|stored| stored == password)
            .unwrap_or(false)
    }
}

#[async_trait]
impl AuthChecker for PasswordChecker {
    async fn start(&self, stream: &mut TcpStream, ctx: &mut SessionContext) -> Result<AuthTurn> {
        let methods = read_greeting(stream).await?;
        if methods.contains(&AuthMethod::UserPass) {
            ctx.select_method(AuthMethod::UserPass);
            Ok(AuthTurn::Pending(vec![
                SOCKS_VERSION,
                AuthMethod::UserPass as u8,
            ]))
        } else {
            warn!("Client offered no acceptable method: {:?}", methods);
            Ok(AuthTurn::Denied(vec![
                SOCKS_VERSION,
                AuthMethod::NoAcceptable as u8,
            ]))
        }
    }

    async fn next(&self, stream: &mut TcpStream, ctx: &mut SessionContext) -> Result<AuthTurn> {
        let (username, password) = read_userpass(stream).await?;
        if self.verify(&username, &password) {
            debug!(user = %username, "User/pass authentication successful");
            ctx.grant(Some(username));
            Ok(AuthTurn::Granted(vec![USERPASS_VERSION, AUTH_SUCCEEDED]))
        } else {
            warn!(user = %username, "User/pass authentication failed");
            Ok(AuthTurn::Denied(vec![USERPASS_VERSION, AUTH_FAILED]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_checks_the_table() {
        let checker = PasswordChecker::new("alice", "secret123");
        assert!(checker.verify("alice", "secret123"));
        assert!(!checker.verify("alice", "wrong"));
        assert!(!checker.verify("bob", "secret123"));
    }

    #[test]
    fn with_users_accepts_any_listed_pair() {
        let mut users = HashMap::new();
        users.insert("alice".to_string(), "a".to_string());
        users.insert("bob".to_string(), "b".to_string());
        let checker = PasswordChecker::with_users(users);
        assert!(checker.verify("bob", "b"));
        assert!(!checker.verify("bob", "a"));
    }
}
