// Core modules for the cacheprobe diagnostic client
pub mod error; // ClientError + Result alias
pub mod resolve; // Resolve trait + literal/first-IPv4 destination selection
pub mod client; // Connection, TcpClient (lazy connect), SharedClient
pub mod memcache; // memcache text protocol encoders/decoders + MemcacheClient
pub mod resp; // RESP command encoder + reply parser

// Re-export the client surface for easier access
pub use error::ClientError;
pub use resolve::*;
pub use client::*;

// Default target - local memcache on its standard port
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 11211;

/// Size of the buffer used for a single receive
pub const RECV_BUF: usize = 4096;
