use crate::protocol::AuthMethod;
use std::net::SocketAddr;
use uuid::Uuid;

/// Authentication progress for one session, carried between checker turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Pending,
    MethodSelected(AuthMethod),
    Authenticated { username: Option<String> },
}

/// Per-session scratch state. Built by the server when a connection is
/// accepted and dropped when the session terminates; never shared across
/// sessions. The client socket is passed to collaborators explicitly.
#[derive(Debug)]
pub struct SessionContext {
    id: Uuid,
    peer_addr: SocketAddr,
    auth: AuthState,
}

impl SessionContext {
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer_addr,
            auth: AuthState::Pending,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    /// Record the method chosen during the method-select turn.
    pub fn select_method(&mut self, method: AuthMethod) {
        self.auth = AuthState::MethodSelected(method);
    }

    /// Record a completed handshake and the authenticated principal, if any.
    pub fn grant(&mut self, username: Option<String>) {
        self.auth = AuthState::Authenticated { username };
    }

    pub fn username(&self) -> Option<&str> {
        match &self.auth {
            AuthState::Authenticated { username } => username.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_state_transitions() {
        let peer = "127.0.0.1:4321".parse().unwrap();
        let mut ctx = SessionContext::new(peer);
        assert_eq!(ctx.auth(), &AuthState::Pending);
        assert_eq!(ctx.username(), None);

        ctx.select_method(AuthMethod::UserPass);
        assert_eq!(ctx.auth(), &AuthState::MethodSelected(AuthMethod::UserPass));

        ctx.grant(Some("alice".to_string()));
        assert_eq!(ctx.username(), Some("alice"));
        assert_eq!(ctx.peer_addr(), peer);
    }
}
