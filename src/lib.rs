//! rendezvous-rs
//!
//! Signaling and rendezvous server for peer-to-peer overlay networks.
//! Members join a virtual address space (subnet/suffix ids with per-address
//! port aliases), exchange session-description offers, answers and
//! candidates through the server, and broker bind/connect/accept handshakes
//! before opening direct channels to one another.

pub mod address;
pub mod allocator;
pub mod client;
pub mod config;
pub mod error;
pub mod framing;
pub mod protocol;
pub mod registry;
pub mod server;

// Re-exports for convenience
pub use address::{Alias, ClientId, Subnet};
pub use client::SignalingClient;
pub use config::ServerConfig;
pub use error::{SignalError, SignalResult};
pub use protocol::{Envelope, Message, Opcode};
pub use server::{run_signaling_server, SignalingServer};
