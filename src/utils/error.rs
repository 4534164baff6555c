use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocklinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection not allowed by ruleset")]
    ConnectionNotAllowed,

    #[error("Network unreachable")]
    NetworkUnreachable,

    #[error("Host unreachable")]
    HostUnreachable,

    #[error("Connection refused")]
    ConnectionRefused,

    #[error("TTL expired")]
    TtlExpired,

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(u8),

    #[error("Unsupported address type: {0}")]
    UnsupportedAddressType(u8),

    #[error("Server closed")]
    Closed,

    #[error("Relay failed after {upload} bytes up / {download} bytes down: {source}")]
    Relay {
        upload: u64,
        download: u64,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SocklinkError>;
