//! Error types for the signaling core.

use crate::address::{Alias, ClientId, Subnet};
use thiserror::Error;

/// Errors surfaced by the allocator, registry, and dispatcher.
///
/// All of these are fatal to the operation that raised them, never to the
/// server as a whole. Lost-race allocator errors (`SubnetDoesNotExist`,
/// `SuffixDoesNotExist`) are logged by the handlers and not propagated to
/// clients; `UnimplementedOperation` closes the offending connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SignalError {
    /// The subnet has no free suffix left (suffixes are capped at 255).
    #[error("subnet {0} has no free suffix")]
    SubnetOverflow(Subnet),

    /// The allocator consulted a subnet that was never materialised.
    #[error("subnet {0} does not exist")]
    SubnetDoesNotExist(Subnet),

    /// The suffix of this id was released while the operation was in flight.
    #[error("suffix {0} does not exist")]
    SuffixDoesNotExist(ClientId),

    /// An explicit port claim collided with an existing allocation.
    #[error("port {0} is already allocated")]
    PortAlreadyAllocated(Alias),

    /// The goodbye procedure ran for an id that is not registered.
    #[error("client {0} does not exist")]
    ClientDoesNotExist(ClientId),

    /// An inbound frame carried an opcode outside the protocol.
    #[error("unimplemented operation: opcode {0}")]
    UnimplementedOperation(u8),

    /// An address string did not match the subnet/ip/alias grammar.
    #[error("malformed address: {0:?}")]
    MalformedAddress(String),

    /// A frame's payload did not match the shape required by its opcode.
    #[error("malformed payload for opcode {opcode}")]
    MalformedPayload {
        opcode: u8,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type alias for signaling operations.
pub type SignalResult<T> = Result<T, SignalError>;
