//! TLS acceptor for server-side connections.

use crate::error::Error;
use crate::identity::{resolve, PeerIdentity};
use aprn_rustls::SessionConfig;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor as TokioTlsAcceptor;

/// A TLS acceptor that reports which expected peer a connection matched.
///
/// # Example
///
/// ```no_run
/// # async fn example(
/// #     session: aprn_rustls::SessionConfig,
/// # ) -> Result<(), Box<dyn std::error::Error>> {
/// use aprn_rustls_tokio::TlsAcceptor;
/// use tokio::net::TcpListener;
///
/// let acceptor = TlsAcceptor::new(&session)?;
/// let listener = TcpListener::bind("127.0.0.1:8443").await?;
///
/// loop {
///     let (stream, _) = listener.accept().await?;
///     let acceptor = acceptor.clone();
///     tokio::spawn(async move {
///         match acceptor.accept(stream).await {
///             Ok((_tls, peer)) => println!("peer: {:?}", peer.identity()),
///             Err(e) => eprintln!("TLS connection failed: {e}"),
///         }
///     });
/// }
/// # }
/// ```
#[derive(Clone)]
pub struct TlsAcceptor {
    inner: TokioTlsAcceptor,
    session: SessionConfig,
}

impl std::fmt::Debug for TlsAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsAcceptor")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl TlsAcceptor {
    /// Creates an acceptor for `session`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if the server configuration cannot be built.
    pub fn new(session: &SessionConfig) -> Result<Self, Error> {
        let config = session.server_config()?;
        Ok(Self {
            inner: TokioTlsAcceptor::from(Arc::new(config)),
            session: session.clone(),
        })
    }

    /// Performs the server side of the handshake over `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the handshake fails, including when the peer
    /// is rejected.
    pub async fn accept<IO>(&self, stream: IO) -> Result<(TlsStream<IO>, PeerIdentity), Error>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let tls_stream = self.inner.accept(stream).await?;
        let (_io, conn) = tls_stream.get_ref();
        let pending = resolve(&self.session, conn.peer_certificates(), None);
        let peer = pending.await;
        Ok((tls_stream, peer))
    }
}
