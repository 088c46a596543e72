//! Peer identity lookup for established connections.

use crate::error::Error;
use aprn_rustls::{Identity, SessionConfig};
use rustls::pki_types::{CertificateDer, ServerName};
use std::future::Future;

/// The authenticated identity of a connected peer.
///
/// `identity` is the expected peer the handshake matched. It is `None` when
/// peer authentication is disabled for the session or the peer sent no
/// certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// The matched expected identity, if known.
    pub identity: Option<Identity>,
}

impl PeerIdentity {
    /// Creates a new `PeerIdentity`.
    pub fn new(identity: Option<Identity>) -> Self {
        Self { identity }
    }

    /// Returns the matched identity, if known.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Returns the matched identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthenticated`] if none is known.
    pub fn require_identity(&self) -> Result<&Identity, Error> {
        self.identity.as_ref().ok_or(Error::Unauthenticated)
    }
}

/// Starts resolving the identity of the peer that presented `peer_certs`.
///
/// The certificates are copied before returning, so the connection need not
/// stay borrowed while the future is polled.
pub(crate) fn resolve(
    session: &SessionConfig,
    peer_certs: Option<&[CertificateDer<'_>]>,
    server_name: Option<ServerName<'static>>,
) -> impl Future<Output = PeerIdentity> + Send + 'static {
    let identity = session.identify_peer(peer_certs.unwrap_or_default(), server_name);
    async move { PeerIdentity::new(identity.await) }
}
