use crate::utils::error::SocklinkError;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// SOCKS5 version
pub const SOCKS_VERSION: u8 = 0x05;

/// Username/password sub-negotiation version (RFC 1929)
pub const USERPASS_VERSION: u8 = 0x01;

/// Authentication methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthMethod {
    NoAuth = 0x00,
    Gssapi = 0x01,
    UserPass = 0x02,
    NoAcceptable = 0xFF,
}

impl From<u8> for AuthMethod {
    fn from(value: u8) -> Self {
        match value {
            0x00 => AuthMethod::NoAuth,
            0x01 => AuthMethod::Gssapi,
            0x02 => AuthMethod::UserPass,
            _ => AuthMethod::NoAcceptable,
        }
    }
}

/// SOCKS5 commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Connect = 0x01,
    Bind = 0x02,
    UdpAssociate = 0x03,
}

impl TryFrom<u8> for Command {
    type Error = SocklinkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Command::Connect),
            0x02 => Ok(Command::Bind),
            0x03 => Ok(Command::UdpAssociate),
            _ => Err(SocklinkError::UnsupportedCommand(value)),
        }
    }
}

/// Address types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    IPv4([u8; 4]),
    IPv6([u8; 16]),
    Domain(String),
}

impl Address {
    /// `host:port` authority suitable for an upstream dial, IPv6 bracketed.
    pub fn authority(&self, port: u16) -> String {
        match self {
            Address::IPv6(octets) => format!("[{}]:{}", Ipv6Addr::from(*octets), port),
            other => format!("{}:{}", other, port),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::IPv4(octets) => write!(f, "{}", Ipv4Addr::from(*octets)),
            Address::IPv6(octets) => write!(f, "{}", Ipv6Addr::from(*octets)),
            Address::Domain(domain) => write!(f, "{}", domain),
        }
    }
}

/// SOCKS5 reply codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    ConnectionNotAllowed = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl ReplyCode {
    /// Map a requester failure to the code carried in the reply frame.
    pub fn for_error(err: &SocklinkError) -> Self {
        match err {
            SocklinkError::ConnectionNotAllowed => ReplyCode::ConnectionNotAllowed,
            SocklinkError::NetworkUnreachable => ReplyCode::NetworkUnreachable,
            SocklinkError::HostUnreachable => ReplyCode::HostUnreachable,
            SocklinkError::ConnectionRefused => ReplyCode::ConnectionRefused,
            SocklinkError::TtlExpired => ReplyCode::TtlExpired,
            SocklinkError::UnsupportedCommand(_) => ReplyCode::CommandNotSupported,
            SocklinkError::UnsupportedAddressType(_) => ReplyCode::AddressTypeNotSupported,
            _ => ReplyCode::GeneralFailure,
        }
    }
}

/// SOCKS5 request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub address: Address,
    pub port: u16,
}

impl Request {
    pub fn authority(&self) -> String {
        self.address.authority(self.port)
    }
}

/// SOCKS5 reply; shares the request layout, the command byte carries the code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: ReplyCode,
    pub address: Address,
    pub port: u16,
}

impl Reply {
    /// Reply with the all-zero bind address the session driver always sends.
    pub fn bare(code: ReplyCode) -> Self {
        Self {
            code,
            address: Address::IPv4([0, 0, 0, 0]),
            port: 0,
        }
    }
}
