//! TCP listener and dialer.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::{ConnectionId, TransportError};

async fn resolve(addr: &str) -> Result<SocketAddr, TransportError> {
    tokio::net::lookup_host(addr)
        .await
        .map_err(|_| TransportError::Resolve(addr.to_string()))?
        .next()
        .ok_or_else(|| TransportError::Resolve(addr.to_string()))
}

/// A listening socket that is polled for new connections.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Binds and starts listening with the given accept backlog.
    pub async fn bind(addr: &str, backlog: u32) -> Result<Self, TransportError> {
        let addr = resolve(addr).await?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(TransportError::BindFailed)?;
        socket.set_reuseaddr(true).map_err(TransportError::BindFailed)?;
        socket.bind(addr).map_err(TransportError::BindFailed)?;
        let listener = socket.listen(backlog).map_err(TransportError::BindFailed)?;

        tracing::info!(%addr, backlog, "TCP transport listening");
        Ok(Self { listener })
    }

    /// The address actually bound (useful after binding port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Takes a pending connection if one is ready, without waiting.
    pub fn try_accept(&self) -> Result<Option<(ConnectionId, TcpStream, SocketAddr)>, TransportError> {
        match self.listener.accept().now_or_never() {
            None => Ok(None),
            Some(Ok((stream, addr))) => {
                stream.set_nodelay(true).map_err(TransportError::AcceptFailed)?;
                let id = ConnectionId::next();
                tracing::debug!(%id, %addr, "accepted TCP connection");
                Ok(Some((id, stream, addr)))
            }
            Some(Err(e)) => Err(TransportError::AcceptFailed(e)),
        }
    }

    /// Polls [`try_accept`](Self::try_accept) every `poll` until a
    /// connection arrives or accepting fails.
    pub async fn accept(
        &self,
        poll: Duration,
    ) -> Result<(ConnectionId, TcpStream, SocketAddr), TransportError> {
        loop {
            if let Some(accepted) = self.try_accept()? {
                return Ok(accepted);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

/// Dials a server and returns a stream ready for a [`ConnectionLoop`](crate::ConnectionLoop).
pub async fn connect(addr: &str) -> Result<TcpStream, TransportError> {
    let addr = resolve(addr).await?;
    let stream = TcpStream::connect(addr)
        .await
        .map_err(TransportError::ConnectFailed)?;
    stream.set_nodelay(true).map_err(TransportError::ConnectFailed)?;
    tracing::debug!(%addr, "connected");
    Ok(stream)
}
