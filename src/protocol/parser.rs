use super::types::*;
use crate::utils::error::{Result, SocklinkError};
use smallvec::SmallVec;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Read the method-select frame and return the offered methods.
pub async fn read_greeting<S>(stream: &mut S) -> Result<Vec<AuthMethod>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let version = stream.read_u8().await?;
    if version != SOCKS_VERSION {
        return Err(SocklinkError::Protocol(format!(
            "Unsupported SOCKS version: 0x{:02x}",
            version
        )));
    }

    let nmethods = stream.read_u8().await?;
    if nmethods == 0 {
        return Err(SocklinkError::Protocol(
            "No authentication methods offered".to_string(),
        ));
    }

    // Clients typically offer 1-3 methods; keep the buffer on the stack.
    let mut methods_buf = SmallVec::<[u8; 8]>::from_elem(0, nmethods as usize);
    stream.read_exact(&mut methods_buf).await?;

    let methods: Vec<AuthMethod> = methods_buf.into_iter().map(AuthMethod::from).collect();

    trace!("Read method-select frame: {} methods", methods.len());

    Ok(methods)
}

/// Read the username/password sub-negotiation frame (RFC 1929).
pub async fn read_userpass<S>(stream: &mut S) -> Result<(String, String)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let version = stream.read_u8().await?;
    if version != USERPASS_VERSION {
        return Err(SocklinkError::Protocol(format!(
            "Unsupported userpass version: 0x{:02x}",
            version
        )));
    }

    let username_len = stream.read_u8().await? as usize;
    let mut username_buf = SmallVec::<[u8; 64]>::from_elem(0, username_len);
    stream.read_exact(&mut username_buf).await?;
    let username = String::from_utf8(username_buf.to_vec())
        .map_err(|_| SocklinkError::Protocol("Invalid username encoding".to_string()))?;

    let password_len = stream.read_u8().await? as usize;
    let mut password_buf = SmallVec::<[u8; 64]>::from_elem(0, password_len);
    stream.read_exact(&mut password_buf).await?;
    let password = String::from_utf8(password_buf.to_vec())
        .map_err(|_| SocklinkError::Protocol("Invalid password encoding".to_string()))?;

    trace!("Read sub-negotiation frame for user: {}", username);

    Ok((username, password))
}

/// Read one request frame. Returns the request and the total bytes consumed.
pub async fn read_request<S>(stream: &mut S) -> Result<(Request, usize)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // Fixed prefix: version, command, reserved, address type
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await?;
    let mut consumed = 4;

    let version = buf[0];
    let command = buf[1];
    let reserved = buf[2];
    let address_type = buf[3];

    if version != SOCKS_VERSION {
        return Err(SocklinkError::Protocol(format!(
            "Unsupported SOCKS version: 0x{:02x}",
            version
        )));
    }

    // RFC 1928: RSV MUST be 0x00
    if reserved != 0x00 {
        return Err(SocklinkError::Protocol(format!(
            "Non-zero reserved field in request: 0x{:02x}",
            reserved
        )));
    }

    let command = Command::try_from(command)?;

    let address = match address_type {
        0x01 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            consumed += 4;
            Address::IPv4(addr)
        }
        0x03 => {
            let domain_len = stream.read_u8().await? as usize;
            consumed += 1;
            if domain_len == 0 {
                return Err(SocklinkError::Protocol(
                    "Empty domain name in request".to_string(),
                ));
            }
            let mut domain_buf = SmallVec::<[u8; 128]>::from_elem(0, domain_len);
            stream.read_exact(&mut domain_buf).await?;
            consumed += domain_len;
            let domain = String::from_utf8(domain_buf.to_vec())
                .map_err(|_| SocklinkError::Protocol("Invalid domain encoding".to_string()))?;
            Address::Domain(domain)
        }
        0x04 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            consumed += 16;
            Address::IPv6(addr)
        }
        _ => {
            return Err(SocklinkError::UnsupportedAddressType(address_type));
        }
    };

    let port = stream.read_u16().await?;
    consumed += 2;

    debug!(
        "Read request: command={:?}, address={}, port={}",
        command, address, port
    );

    Ok((
        Request {
            command,
            address,
            port,
        },
        consumed,
    ))
}

/// Write one reply frame. Returns the bytes written.
pub async fn write_reply<S>(stream: &mut S, reply: &Reply) -> Result<usize>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut buf = SmallVec::<[u8; 256]>::new();
    buf.push(SOCKS_VERSION);
    buf.push(reply.code as u8);
    buf.push(0x00);

    match &reply.address {
        Address::IPv4(octets) => {
            buf.push(0x01);
            buf.extend_from_slice(octets);
        }
        Address::IPv6(octets) => {
            buf.push(0x04);
            buf.extend_from_slice(octets);
        }
        Address::Domain(domain) => {
            // RFC 1928: the name length prefix is a single octet
            if domain.is_empty() || domain.len() > 255 {
                return Err(SocklinkError::Protocol(format!(
                    "Domain name length out of range: {} octets",
                    domain.len()
                )));
            }
            buf.push(0x03);
            buf.push(domain.len() as u8);
            buf.extend_from_slice(domain.as_bytes());
        }
    }

    buf.extend_from_slice(&reply.port.to_be_bytes());

    stream.write_all(&buf).await?;
    stream.flush().await?;

    trace!("Wrote reply: code={:?}, {} bytes", reply.code, buf.len());

    Ok(buf.len())
}
