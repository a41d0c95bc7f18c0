//! Unified error type for the Worldlink framework.

use worldlink_protocol::{EncodeError, ProtocolError};
use worldlink_session::{RemoteError, SessionError};
use worldlink_transport::TransportError;
use worldlink_world::WorldError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `worldlink` meta-crate, you deal with this single
/// error type instead of importing errors from each sub-crate.
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum WorldlinkError {
    /// Binding, accepting, or dialing failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A message could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-state request was refused.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The world refused a mutation or a record was malformed.
    #[error(transparent)]
    World(#[from] WorldError),

    /// The peer answered with `ERR`.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Reading or writing configuration, or querying a socket address.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A configuration file did not parse.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// The connection has already stopped.
    #[error("connection closed")]
    Closed,
}

impl From<EncodeError> for WorldlinkError {
    fn from(err: EncodeError) -> Self {
        Self::Protocol(err.into())
    }
}
