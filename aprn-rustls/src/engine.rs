//! Trust engine abstraction and the default webpki-backed engine.
//!
//! A [`TrustEngine`] hands out one [`PeerTrust`] per verification attempt.
//! The attempt installs the trust anchors, then starts an asynchronous
//! evaluation whose result is a [`TrustEvaluation`]. Only a `Trusted`
//! evaluation carries the certificate chain, so nothing downstream can match
//! identities against a chain the engine has not accepted.

use crate::anchors::TrustAnchorSet;
use crate::crypto;
use futures::future::BoxFuture;
use futures::FutureExt as _;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::RootCertStore;
use std::fmt;
use std::sync::Arc;
use webpki::{EndEntityCert, KeyUsage};

/// The certificates a peer presented during the handshake.
#[derive(Clone, Debug)]
pub struct PresentedChain {
    /// The peer's end-entity certificate.
    pub end_entity: CertificateDer<'static>,
    /// Intermediates in the order the peer sent them.
    pub intermediates: Vec<CertificateDer<'static>>,
    /// Time the chain is validated at.
    pub now: UnixTime,
    /// The name the client dialed. Set only when a client verifies a server.
    pub server_name: Option<ServerName<'static>>,
}

impl PresentedChain {
    /// A chain presented by a client to a server.
    pub fn new(
        end_entity: CertificateDer<'static>,
        intermediates: Vec<CertificateDer<'static>>,
        now: UnixTime,
    ) -> Self {
        Self {
            end_entity,
            intermediates,
            now,
            server_name: None,
        }
    }

    /// Marks the chain as presented by a server reached under `server_name`.
    #[must_use]
    pub fn with_server_name(mut self, server_name: ServerName<'static>) -> Self {
        self.server_name = Some(server_name);
        self
    }
}

/// Errors produced by a trust engine.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The anchor set holds no usable root.
    #[error("no usable trust anchors")]
    NoAnchors,

    /// Evaluation was requested before anchors were installed.
    #[error("trust anchors were not installed")]
    AnchorsNotSet,

    /// webpki rejected the chain.
    #[error("certificate rejected: {0}")]
    Certificate(#[from] webpki::Error),

    /// Any other engine failure.
    #[error("{0}")]
    Other(String),
}

/// Result of an asynchronous chain evaluation.
#[derive(Debug)]
pub enum TrustEvaluation {
    /// The chain anchors in a trusted root.
    Trusted {
        /// Ordered leaf to root. `None` or empty is treated as a failure.
        chain: Option<Vec<CertificateDer<'static>>>,
    },
    /// The chain was rejected.
    Untrusted {
        /// Why, when the engine can say.
        error: Option<EngineError>,
    },
}

/// Per-attempt trust state.
pub trait PeerTrust: Send {
    /// Installs the anchors the chain must lead to.
    ///
    /// # Errors
    ///
    /// Returns an error if the anchors cannot be used.
    fn set_anchor_certificates(&mut self, anchors: &TrustAnchorSet) -> Result<(), EngineError>;

    /// Starts evaluation.
    ///
    /// # Errors
    ///
    /// `Err` means the evaluation could not be started at all; a rejected chain
    /// is reported through [`TrustEvaluation::Untrusted`] instead.
    fn evaluate(self: Box<Self>) -> Result<BoxFuture<'static, TrustEvaluation>, EngineError>;
}

/// Source of per-attempt [`PeerTrust`] objects.
pub trait TrustEngine: Send + Sync + fmt::Debug {
    /// Creates the trust state for one presented chain.
    fn trust_for(&self, presented: PresentedChain) -> Box<dyn PeerTrust>;
}

/// Validates chains with webpki path building.
///
/// Client chains are checked for the client-auth EKU; server chains for the
/// server-auth EKU and the dialed name. The chain handed on is the path
/// webpki verified, not the presented one.
#[derive(Clone)]
pub struct WebPkiTrustEngine {
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for WebPkiTrustEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebPkiTrustEngine").finish_non_exhaustive()
    }
}

impl Default for WebPkiTrustEngine {
    fn default() -> Self {
        Self::new(crypto::provider())
    }
}

impl WebPkiTrustEngine {
    /// An engine verifying signatures with `provider`.
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl TrustEngine for WebPkiTrustEngine {
    fn trust_for(&self, presented: PresentedChain) -> Box<dyn PeerTrust> {
        Box::new(WebPkiPeerTrust {
            presented,
            provider: Arc::clone(&self.provider),
            roots: None,
            anchors: Vec::new(),
        })
    }
}

struct WebPkiPeerTrust {
    presented: PresentedChain,
    provider: Arc<CryptoProvider>,
    roots: Option<Arc<RootCertStore>>,
    anchors: Vec<CertificateDer<'static>>,
}

impl PeerTrust for WebPkiPeerTrust {
    fn set_anchor_certificates(&mut self, anchors: &TrustAnchorSet) -> Result<(), EngineError> {
        let roots = anchors.root_store().ok_or(EngineError::NoAnchors)?;
        self.roots = Some(roots);
        self.anchors = anchors.certificates().to_vec();
        Ok(())
    }

    fn evaluate(self: Box<Self>) -> Result<BoxFuture<'static, TrustEvaluation>, EngineError> {
        let Self {
            presented,
            provider,
            roots,
            anchors,
        } = *self;
        let roots = roots.ok_or(EngineError::AnchorsNotSet)?;

        Ok(async move {
            match verified_chain(&presented, &roots, &anchors, &provider) {
                Ok(chain) => TrustEvaluation::Trusted { chain: Some(chain) },
                Err(e) => TrustEvaluation::Untrusted {
                    error: Some(EngineError::Certificate(e)),
                },
            }
        }
        .boxed())
    }
}

/// Builds and verifies a path from the presented leaf to one of `roots`.
///
/// Returns the verified path ordered leaf first, intermediates as webpki
/// chained them, then the anchoring root. Presented certificates that are
/// not on the path never appear in the result.
fn verified_chain(
    presented: &PresentedChain,
    roots: &RootCertStore,
    anchors: &[CertificateDer<'static>],
    provider: &CryptoProvider,
) -> Result<Vec<CertificateDer<'static>>, webpki::Error> {
    let end_entity = EndEntityCert::try_from(&presented.end_entity)?;
    let usage = if presented.server_name.is_some() {
        KeyUsage::server_auth()
    } else {
        KeyUsage::client_auth()
    };

    let path = end_entity.verify_for_usage(
        provider.signature_verification_algorithms.all,
        &roots.roots,
        &presented.intermediates,
        presented.now,
        usage,
        None,
        None,
    )?;
    if let Some(name) = &presented.server_name {
        end_entity.verify_is_valid_for_subject_name(name)?;
    }

    let mut chain = vec![presented.end_entity.clone()];
    chain.extend(
        path.intermediate_certificates()
            .map(|cert| cert.der().into_owned()),
    );
    let anchor = path.anchor();
    if let Some(root) = anchors
        .iter()
        .find(|root| webpki::anchor_from_trusted_cert(root).is_ok_and(|a| a == *anchor))
    {
        chain.push(root.clone());
    }
    Ok(chain)
}
