// Socklink - embeddable SOCKS5 proxy server

pub mod auth;
pub mod config;
pub mod protocol;
pub mod server;
pub mod session;
pub mod utils;

// Re-export commonly used types
pub use server::{ConnLinker, DefaultLinker, DirectRequester, LinkTotals, Requester, Server};
pub use utils::error::{Result, SocklinkError};
