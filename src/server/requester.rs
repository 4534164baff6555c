use crate::protocol::{Address, Command, Request};
use crate::session::SessionContext;
use crate::utils::error::{Result, SocklinkError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Maps a decoded request to an established upstream connection.
#[async_trait]
pub trait Requester: Send + Sync {
    async fn establish(
        &self,
        request: &Request,
        ctx: &mut SessionContext,
    ) -> Result<TcpStream>;
}

/// Default requester: CONNECT only, direct TCP dial to the destination.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectRequester;

impl DirectRequester {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Requester for DirectRequester {
    async fn establish(
        &self,
        request: &Request,
        ctx: &mut SessionContext,
    ) -> Result<TcpStream> {
        if request.command != Command::Connect {
            return Err(SocklinkError::UnsupportedCommand(request.command as u8));
        }

        let candidates = resolve_address(&request.address, request.port).await?;

        let mut last_err: Option<std::io::Error> = None;
        for target in candidates {
            debug!(session = %ctx.id(), "Attempting upstream connection to {}", target);
            match TcpStream::connect(target).await {
                Ok(stream) => {
                    // Nagle hurts small-packet latency on proxied links
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY on upstream socket: {}", e);
                    }
                    return Ok(stream);
                }
                Err(e) => {
                    last_err = Some(e);
                }
            }
        }

        let err = last_err
            .unwrap_or_else(|| std::io::Error::other("no reachable upstream addresses"));
        warn!(
            session = %ctx.id(),
            "Failed to connect to {}: {}",
            request.authority(),
            err
        );
        Err(map_dial_error(err))
    }
}

/// Resolve a SOCKS5 address into dial candidates, IPv6 entries first.
pub(crate) async fn resolve_address(address: &Address, port: u16) -> Result<Vec<SocketAddr>> {
    let mut targets = match address {
        Address::IPv4(octets) => {
            let ip = IpAddr::V4(Ipv4Addr::from(*octets));
            vec![SocketAddr::new(ip, port)]
        }
        Address::IPv6(octets) => {
            let ip = IpAddr::V6(Ipv6Addr::from(*octets));
            vec![SocketAddr::new(ip, port)]
        }
        Address::Domain(domain) => {
            let lookup = tokio::net::lookup_host((domain.as_str(), port))
                .await
                .map_err(|_| SocklinkError::HostUnreachable)?;
            lookup.collect()
        }
    };

    targets.sort_by_key(|addr| match addr.ip() {
        IpAddr::V6(_) => 0,
        IpAddr::V4(_) => 1,
    });

    if targets.is_empty() {
        return Err(SocklinkError::HostUnreachable);
    }

    Ok(targets)
}

/// Classify a dial failure into the reply-mapped error taxonomy.
fn map_dial_error(err: std::io::Error) -> SocklinkError {
    match err.kind() {
        ErrorKind::ConnectionRefused => SocklinkError::ConnectionRefused,
        ErrorKind::HostUnreachable | ErrorKind::AddrNotAvailable => SocklinkError::HostUnreachable,
        ErrorKind::NetworkUnreachable | ErrorKind::NetworkDown => SocklinkError::NetworkUnreachable,
        ErrorKind::TimedOut => SocklinkError::TtlExpired,
        ErrorKind::PermissionDenied => SocklinkError::ConnectionNotAllowed,
        _ => SocklinkError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_ipv4_literal() {
        let addr = Address::IPv4([127, 0, 0, 1]);
        let resolved = resolve_address(&addr, 8080).await.unwrap();
        assert_eq!(resolved, vec![SocketAddr::from(([127, 0, 0, 1], 8080))]);
    }

    #[tokio::test]
    async fn resolves_ipv6_literal() {
        let mut octets = [0u8; 16];
        octets[15] = 1;
        let resolved = resolve_address(&Address::IPv6(octets), 8080).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(matches!(resolved[0].ip(), IpAddr::V6(_)));
    }

    #[tokio::test]
    async fn rejects_non_connect_commands() {
        let requester = DirectRequester::new();
        let mut ctx = SessionContext::new("127.0.0.1:9999".parse().unwrap());
        let request = Request {
            command: Command::Bind,
            address: Address::IPv4([127, 0, 0, 1]),
            port: 80,
        };

        let err = requester.establish(&request, &mut ctx).await.unwrap_err();
        assert!(matches!(err, SocklinkError::UnsupportedCommand(0x02)));
    }

    #[tokio::test]
    async fn refused_dial_maps_to_connection_refused() {
        // Bind a listener to reserve a port, then drop it before dialing.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let requester = DirectRequester::new();
        let mut ctx = SessionContext::new("127.0.0.1:9999".parse().unwrap());
        let request = Request {
            command: Command::Connect,
            address: Address::IPv4([127, 0, 0, 1]),
            port,
        };

        let err = requester.establish(&request, &mut ctx).await.unwrap_err();
        assert!(matches!(err, SocklinkError::ConnectionRefused));
    }
}
