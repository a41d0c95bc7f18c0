/// Errors that can occur in the transport layer.
///
/// Only setup operations surface these. Once a [`ConnectionLoop`](crate::ConnectionLoop)
/// is running, socket faults end the loop with a
/// [`CloseReason`](crate::CloseReason) instead of an error.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The address didn't resolve to anything we can bind or dial.
    #[error("could not resolve address {0}")]
    Resolve(String),

    /// Creating, binding, or listening on the socket failed.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Accepting a pending connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Dialing the remote peer failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),
}
