//! Socket helpers producing the read/write halves a connection runs on.
//!
//! - TCP (all platforms), with `TCP_NODELAY` set since requests are small and
//!   latency bound
//! - Unix Domain Socket (unix only)
//!
//! Any other `AsyncRead`/`AsyncWrite` pair can be handed to
//! [`ConnectionBuilder::connect`](crate::ConnectionBuilder::connect) directly.

use tokio::net::{tcp, TcpStream, ToSocketAddrs};

use crate::error::Result;

/// Connect over TCP and split the stream.
pub async fn connect_tcp<A: ToSocketAddrs>(
    addr: A,
) -> Result<(tcp::OwnedReadHalf, tcp::OwnedWriteHalf)> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    tracing::debug!(peer = ?stream.peer_addr().ok(), "TCP connection established");
    Ok(stream.into_split())
}

#[cfg(unix)]
pub use unix_impl::connect_unix;

#[cfg(unix)]
mod unix_impl {
    use std::path::Path;

    use tokio::net::{unix, UnixStream};

    use crate::error::Result;

    /// Connect to a Unix Domain Socket and split the stream.
    pub async fn connect_unix<P: AsRef<Path>>(
        path: P,
    ) -> Result<(unix::OwnedReadHalf, unix::OwnedWriteHalf)> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await?;
        tracing::debug!(path = %path.display(), "Unix socket connection established");
        Ok(stream.into_split())
    }
}
