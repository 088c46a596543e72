//! rustls hooks that hand presented chains to the [`AsyncTrustEvaluator`].
//!
//! rustls verifies certificates synchronously, so the hooks submit the chain
//! and block the handshake on the attempt's single completion. A rejected
//! peer gets a generic alert; the failure reason stays local.

use crate::completion::VerificationOutcome;
use crate::crypto;
use crate::engine::PresentedChain;
use crate::evaluator::AsyncTrustEvaluator;
use crate::identity::Identity;
use crate::prelude::{debug, error, warn};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::ResolvesClientCert;
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, SignatureScheme};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Supplies the local credential presented in every handshake.
///
/// When it returns `None`, a server aborts the handshake, while a client
/// sends an empty Certificate message and leaves the decision to the server.
pub type IdentityCallback = Arc<dyn Fn() -> Option<Arc<CertifiedKey>> + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    m.lock().ok()
}

fn rejected() -> rustls::Error {
    rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure)
}

/// Bounded record of peers accepted by a handshake, keyed by the exact leaf
/// DER, with least-recently-used eviction.
///
/// Lets post-handshake code ask which expected identity a connection's peer
/// matched without re-running extraction.
pub(crate) struct AcceptedPeers {
    inner: Mutex<PeerLru>,
}

struct PeerLru {
    entries: HashMap<Vec<u8>, Identity>,
    order: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl PeerLru {
    fn touch(&mut self, key: &[u8]) {
        if let Some(pos) = self.order.iter().position(|k| k.as_slice() == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

impl AcceptedPeers {
    pub(crate) const CAPACITY: usize = 64;

    pub(crate) fn new() -> Self {
        Self::with_capacity(Self::CAPACITY)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PeerLru {
                entries: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
            }),
        }
    }

    pub(crate) fn remember(&self, leaf: &CertificateDer<'_>, identity: Identity) {
        let Some(mut lru) = lock(&self.inner) else {
            error!("accepted peer cache mutex poisoned; peer identity not recorded");
            return;
        };
        let key = leaf.as_ref();
        if let Some(existing) = lru.entries.get_mut(key) {
            *existing = identity;
            lru.touch(key);
            return;
        }
        if lru.entries.len() >= lru.capacity {
            if let Some(oldest) = lru.order.pop_front() {
                lru.entries.remove(&oldest);
            }
        }
        lru.entries.insert(key.to_vec(), identity);
        lru.order.push_back(key.to_vec());
    }

    pub(crate) fn lookup(&self, leaf: &CertificateDer<'_>) -> Option<Identity> {
        let mut lru = lock(&self.inner)?;
        let identity = lru.entries.get(leaf.as_ref()).cloned()?;
        lru.touch(leaf.as_ref());
        Some(identity)
    }
}

impl fmt::Debug for AcceptedPeers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = lock(&self.inner).map(|lru| lru.entries.len());
        f.debug_struct("AcceptedPeers").field("len", &len).finish()
    }
}

fn owned_chain(
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
    now: UnixTime,
) -> PresentedChain {
    PresentedChain::new(
        end_entity.clone().into_owned(),
        intermediates.iter().map(|c| c.clone().into_owned()).collect(),
        now,
    )
}

/// Handshake signature checks shared by every verifier here.
#[derive(Clone, Debug)]
struct Signatures(WebPkiSupportedAlgorithms);

impl Signatures {
    fn new() -> Self {
        Self(crypto::signature_algorithms())
    }

    fn tls12(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0)
    }

    fn tls13(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0)
    }

    fn schemes(&self) -> Vec<SignatureScheme> {
        self.0.supported_schemes()
    }
}

// ------------ Client verifier (server side) ------------

/// Authenticates clients by APRN. Installed on servers with peer
/// authentication enabled.
pub(crate) struct HandshakeClientVerifier {
    evaluator: AsyncTrustEvaluator,
    peers: Arc<AcceptedPeers>,
    signatures: Signatures,
}

impl HandshakeClientVerifier {
    pub(crate) fn new(evaluator: AsyncTrustEvaluator, peers: Arc<AcceptedPeers>) -> Self {
        Self {
            evaluator,
            peers,
            signatures: Signatures::new(),
        }
    }
}

impl fmt::Debug for HandshakeClientVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeClientVerifier")
            .field("expected", self.evaluator.expected())
            .finish_non_exhaustive()
    }
}

impl ClientCertVerifier for HandshakeClientVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.evaluator.anchors().root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        let presented = owned_chain(end_entity, intermediates, now);
        match self.evaluator.verify_blocking(presented) {
            VerificationOutcome::Accepted(identity) => {
                self.peers.remember(end_entity, identity);
                Ok(ClientCertVerified::assertion())
            }
            VerificationOutcome::Rejected(_) => Err(rejected()),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.signatures.tls12(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.signatures.tls13(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.signatures.schemes()
    }
}

// ------------ Server verifier (client side) ------------

/// Authenticates servers by APRN. Installed on clients with peer
/// authentication enabled.
pub(crate) struct HandshakeServerVerifier {
    evaluator: AsyncTrustEvaluator,
    peers: Arc<AcceptedPeers>,
    signatures: Signatures,
}

impl HandshakeServerVerifier {
    pub(crate) fn new(evaluator: AsyncTrustEvaluator, peers: Arc<AcceptedPeers>) -> Self {
        Self {
            evaluator,
            peers,
            signatures: Signatures::new(),
        }
    }
}

impl fmt::Debug for HandshakeServerVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeServerVerifier")
            .field("expected", self.evaluator.expected())
            .finish_non_exhaustive()
    }
}

impl ServerCertVerifier for HandshakeServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let presented =
            owned_chain(end_entity, intermediates, now).with_server_name(server_name.to_owned());
        match self.evaluator.verify_blocking(presented) {
            VerificationOutcome::Accepted(identity) => {
                self.peers.remember(end_entity, identity);
                Ok(ServerCertVerified::assertion())
            }
            VerificationOutcome::Rejected(_) => Err(rejected()),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.signatures.tls12(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.signatures.tls13(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.signatures.schemes()
    }
}

/// Accepts any server certificate but still checks that the server holds
/// its key. Used when peer authentication is disabled.
#[derive(Debug)]
pub(crate) struct SignatureOnlyServerVerifier {
    signatures: Signatures,
}

impl SignatureOnlyServerVerifier {
    pub(crate) fn new() -> Self {
        Self {
            signatures: Signatures::new(),
        }
    }
}

impl ServerCertVerifier for SignatureOnlyServerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        debug!("peer validation disabled; not verifying certificate of {server_name:?}");
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.signatures.tls12(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.signatures.tls13(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.signatures.schemes()
    }
}

// ------------ Challenge resolvers ------------

fn challenge(callback: &IdentityCallback, on_missing: &str) -> Option<Arc<CertifiedKey>> {
    let key = (**callback)();
    if key.is_none() {
        warn!("identity callback returned no credential; {on_missing}");
    }
    key
}

/// Presents the local credential to clients.
pub(crate) struct ChallengeServerResolver {
    callback: IdentityCallback,
}

impl ChallengeServerResolver {
    pub(crate) fn new(callback: IdentityCallback) -> Self {
        Self { callback }
    }
}

impl fmt::Debug for ChallengeServerResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeServerResolver").finish_non_exhaustive()
    }
}

impl ResolvesServerCert for ChallengeServerResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        challenge(&self.callback, "aborting handshake")
    }
}

/// Presents the local credential to servers.
pub(crate) struct ChallengeClientResolver {
    callback: IdentityCallback,
}

impl ChallengeClientResolver {
    pub(crate) fn new(callback: IdentityCallback) -> Self {
        Self { callback }
    }
}

impl fmt::Debug for ChallengeClientResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeClientResolver").finish_non_exhaustive()
    }
}

impl ResolvesClientCert for ChallengeClientResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        challenge(&self.callback, "sending no client certificate")
    }

    fn has_certs(&self) -> bool {
        true
    }
}
