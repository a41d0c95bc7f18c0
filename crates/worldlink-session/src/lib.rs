//! Session layer for Worldlink.
//!
//! Sits between the transport (bytes on a socket) and the application
//! (the world being synchronized):
//!
//! - [`DispatchTable`]: routes each decoded [`Message`](worldlink_protocol::Message)
//!   to the one handler registered for its command.
//! - [`SessionRegistry`]: the server's view of who is connected and who
//!   has joined, with unique display names among joined players.
//! - [`BroadcastLedger`]: the client's view of which broadcasts are
//!   still unacknowledged, and the latency estimate their acks produce.
//! - [`CommandError`] / [`RemoteError`]: the two sides of an `ERR` reply.

mod dispatch;
mod error;
mod ledger;
mod registry;

pub use dispatch::{Args, Dispatch, DispatchTable};
pub use error::{CommandError, ErrorCategory, RemoteError, SessionError, codes};
pub use ledger::{
    Ack, AckCallback, Acknowledged, BroadcastLedger, LatencyEstimate, generate_broadcast_id,
};
pub use registry::{PlayerBinding, Session, SessionRegistry};
