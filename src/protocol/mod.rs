pub mod parser;
pub mod types;

pub use parser::{read_greeting, read_request, read_userpass, write_reply};
pub use types::{
    Address, AuthMethod, Command, Reply, ReplyCode, Request, SOCKS_VERSION, USERPASS_VERSION,
};
