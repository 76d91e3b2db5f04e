// Core types are re-exported so hosts only need this crate.
pub use linkcore::{
    ClientError, ConnectionState, DecodePolicy, Endpoint, Framing, PacketError, PrefixWidth,
    Result, packet,
};

mod actors;
pub mod callbacks;
pub mod client;
pub mod config;
pub mod transport;
mod upload;

pub use client::SocketClient;
pub use config::ClientConfig;
