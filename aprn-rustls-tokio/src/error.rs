//! Error types for `aprn-rustls-tokio`.

use thiserror::Error;

/// Errors returned by `aprn-rustls-tokio`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The session could not be turned into a rustls configuration.
    #[error("session configuration error: {0}")]
    Session(#[from] aprn_rustls::Error),

    /// A rustls error occurred.
    #[error("rustls error: {0}")]
    Rustls(#[from] tokio_rustls::rustls::Error),

    /// The handshake succeeded but no expected identity is recorded for the
    /// peer.
    ///
    /// Returned by [`PeerIdentity::require_identity`](crate::PeerIdentity::require_identity).
    #[error("peer has no authenticated identity")]
    Unauthenticated,

    /// An I/O error occurred, including handshake failures surfaced by
    /// `tokio-rustls`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
