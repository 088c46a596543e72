//! TLS connector for client-side connections.

use crate::error::Error;
use crate::identity::{resolve, PeerIdentity};
use aprn_rustls::SessionConfig;
use rustls::pki_types::ServerName;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector as TokioTlsConnector;

/// A TLS connector that reports which expected peer a server matched.
///
/// The `ServerName` passed to `connect` is used for SNI and for the chain
/// evaluation; the server is authorized by identity, not hostname.
#[derive(Clone)]
pub struct TlsConnector {
    inner: TokioTlsConnector,
    session: SessionConfig,
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl TlsConnector {
    /// Creates a connector for `session`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if the client configuration cannot be built.
    pub fn new(session: &SessionConfig) -> Result<Self, Error> {
        let config = session.client_config()?;
        Ok(Self {
            inner: TokioTlsConnector::from(Arc::new(config)),
            session: session.clone(),
        })
    }

    /// Performs the client side of the handshake over `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the handshake fails, including when the
    /// server is rejected.
    pub async fn connect<IO>(
        &self,
        server_name: ServerName<'static>,
        stream: IO,
    ) -> Result<(TlsStream<IO>, PeerIdentity), Error>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let tls_stream = self.inner.connect(server_name.clone(), stream).await?;
        let (_io, conn) = tls_stream.get_ref();
        let pending = resolve(&self.session, conn.peer_certificates(), Some(server_name));
        let peer = pending.await;
        Ok((tls_stream, peer))
    }

    /// Connects over TCP and then performs the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the TCP connection or the handshake fails.
    pub async fn connect_addr(
        &self,
        addr: SocketAddr,
        server_name: ServerName<'static>,
    ) -> Result<(TlsStream<TcpStream>, PeerIdentity), Error> {
        let stream = TcpStream::connect(addr).await?;
        self.connect(server_name, stream).await
    }
}
