mod handler;
pub mod relay;
pub mod requester;

pub use relay::{ConnLinker, DefaultLinker, LinkTotals};
pub use requester::{DirectRequester, Requester};

use crate::auth::{AuthChecker, NoAuthChecker, PasswordChecker};
use crate::utils::error::{Result, SocklinkError};
use handler::{serve, HandlerContext};
use std::collections::HashMap;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// SOCKS5 server. Construct, optionally install hooks, then `run` (or
/// `listen_and_run`). `close` stops accepting and drains in-flight sessions.
pub struct Server {
    checker: Arc<dyn AuthChecker>,
    requester: Arc<dyn Requester>,
    linker: Arc<dyn ConnLinker>,
    handshake_timeout: Option<Duration>,
    sessions: TaskTracker,
    shutdown: CancellationToken,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Server with the default hooks: no-auth handshake, direct TCP dialing,
    /// and the default stream coupler.
    pub fn new() -> Self {
        Self {
            checker: Arc::new(NoAuthChecker),
            requester: Arc::new(DirectRequester::new()),
            linker: Arc::new(DefaultLinker::new()),
            handshake_timeout: None,
            sessions: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Server requiring username/password authentication for exactly the
    /// given pair. Two empty strings degrade to the no-auth checker.
    pub fn with_password(username: &str, password: &str) -> Self {
        let mut server = Self::new();
        if !(username.is_empty() && password.is_empty()) {
            server.checker = Arc::new(PasswordChecker::new(username, password));
        }
        server
    }

    /// Server requiring username/password authentication against a
    /// multi-user credential table.
    pub fn with_users(users: HashMap<String, String>) -> Self {
        let mut server = Self::new();
        server.checker = Arc::new(PasswordChecker::with_users(users));
        server
    }

    pub fn set_auth_checker(&mut self, checker: impl AuthChecker + 'static) {
        self.checker = Arc::new(checker);
    }

    pub fn set_requester(&mut self, requester: impl Requester + 'static) {
        self.requester = Arc::new(requester);
    }

    pub fn set_linker(&mut self, linker: impl ConnLinker + 'static) {
        self.linker = Arc::new(linker);
    }

    /// Deadline covering everything up to and including the reply frame.
    /// None (the default) leaves the handshake unbounded.
    pub fn set_handshake_timeout(&mut self, deadline: Option<Duration>) {
        self.handshake_timeout = deadline;
    }

    /// Bind an IPv4 TCP listener on `addr` and run the accept loop on it.
    pub async fn listen_and_run(&self, addr: &str) -> Result<()> {
        let addr: SocketAddrV4 = addr.parse().map_err(|e| {
            SocklinkError::Config(format!("Invalid IPv4 listen address '{}': {}", addr, e))
        })?;
        let listener = TcpListener::bind(SocketAddr::V4(addr)).await?;
        self.run(listener).await
    }

    /// Accept connections until shutdown, driving each session on its own
    /// task. Returns the error that ended the loop.
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        info!("Socklink listening on {}", listener.local_addr()?);

        let shared = Arc::new(HandlerContext {
            checker: self.checker.clone(),
            requester: self.requester.clone(),
            linker: self.linker.clone(),
            handshake_timeout: self.handshake_timeout,
        });

        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => return Err(SocklinkError::Closed),
                accepted = listener.accept() => accepted?,
            };

            debug!("New connection from {}", peer);

            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY on client socket: {}", e);
            }

            // Registration happens here, before the task runs, so close()
            // observes every accepted session.
            let shared = shared.clone();
            self.sessions.spawn(async move {
                if let Err(e) = serve(stream, peer, shared).await {
                    warn!("Session from {} ended with error: {}", peer, e);
                }
            });
        }
    }

    /// Stop the accept loop, then wait for every in-flight session to
    /// terminate. A second call fails with [`SocklinkError::Closed`].
    pub async fn close(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(SocklinkError::Closed);
        }
        self.shutdown.cancel();
        self.sessions.close();

        info!("Listener closed, draining in-flight sessions");
        self.sessions.wait().await;

        Ok(())
    }
}
