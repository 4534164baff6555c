use crate::auth::{AuthChecker, AuthTurn};
use crate::protocol::{read_request, write_reply, Reply, ReplyCode};
use crate::server::relay::ConnLinker;
use crate::server::requester::Requester;
use crate::session::SessionContext;
use crate::utils::error::{Result, SocklinkError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Hooks shared by every session: set before `run`, read-only afterwards.
pub(crate) struct HandlerContext {
    pub checker: Arc<dyn AuthChecker>,
    pub requester: Arc<dyn Requester>,
    pub linker: Arc<dyn ConnLinker>,
    pub handshake_timeout: Option<Duration>,
}

/// Drive one accepted connection: authenticate, read the request, establish
/// the upstream, write the reply, then relay until both directions finish.
pub(crate) async fn serve(
    mut stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<HandlerContext>,
) -> Result<()> {
    let mut ctx = SessionContext::new(peer);

    let upstream = match shared.handshake_timeout {
        Some(deadline) => {
            match tokio::time::timeout(deadline, negotiate(&mut stream, &mut ctx, &shared)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(SocklinkError::Protocol(
                        "Handshake deadline exceeded".to_string(),
                    ))
                }
            }
        }
        None => negotiate(&mut stream, &mut ctx, &shared).await?,
    };

    // The reply is on the wire; couple the two sockets until both sides are done.
    let totals = shared.linker.link(stream, upstream).await?;

    info!(
        session = %ctx.id(),
        upload = totals.upload,
        download = totals.download,
        "Relay complete"
    );

    Ok(())
}

/// Handshake through reply: everything that happens before relay bytes flow.
/// Returns the established upstream socket.
async fn negotiate(
    stream: &mut TcpStream,
    ctx: &mut SessionContext,
    shared: &HandlerContext,
) -> Result<TcpStream> {
    run_auth(stream, ctx, shared.checker.as_ref()).await?;

    let (request, _) = read_request(stream).await?;

    info!(
        session = %ctx.id(),
        user = ctx.username().unwrap_or("-"),
        command = ?request.command,
        dest = %request.authority(),
        "Request received"
    );

    let outcome = shared.requester.establish(&request, ctx).await;

    let code = match &outcome {
        Ok(_) => ReplyCode::Succeeded,
        Err(e) => ReplyCode::for_error(e),
    };

    // The reply always precedes the relay, and is written even on failure so
    // the client observes the code before the server hangs up.
    write_reply(stream, &Reply::bare(code)).await?;

    outcome
}

/// Drive the configured checker. Every response it produces is written here,
/// and a failed write aborts the session.
async fn run_auth(
    stream: &mut TcpStream,
    ctx: &mut SessionContext,
    checker: &dyn AuthChecker,
) -> Result<()> {
    let mut turn = checker.start(stream, ctx).await?;
    loop {
        match turn {
            AuthTurn::Pending(response) => {
                stream.write_all(&response).await?;
                stream.flush().await?;
                turn = checker.next(stream, ctx).await?;
            }
            AuthTurn::Granted(response) => {
                stream.write_all(&response).await?;
                stream.flush().await?;
                debug!(session = %ctx.id(), "Handshake complete");
                return Ok(());
            }
            AuthTurn::Denied(response) => {
                stream.write_all(&response).await?;
                stream.flush().await?;
                return Err(SocklinkError::AuthFailed(
                    "Handshake rejected by authenticator".to_string(),
                ));
            }
        }
    }
}
