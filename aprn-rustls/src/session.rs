//! Session configuration: the single entry point that turns expected peers,
//! root material and a local credential into rustls configurations.

use crate::anchors::TrustAnchorSet;
use crate::client::build_client_config;
use crate::config::PeerAuthSettings;
use crate::crypto;
use crate::engine::{PresentedChain, TrustEngine};
use crate::error::Result;
use crate::evaluator::AsyncTrustEvaluator;
use crate::executor::VerifyExecutor;
use crate::extract::Extractors;
use crate::failure::MetricsSink;
use crate::identity::{ExpectedIdentities, Identity, SUPPORTED_DOMAINS};
use crate::prelude::{debug, info, warn};
use crate::scheme::{Scheme, SchemeDetector};
use crate::server::build_server_config;
use crate::verifier::{AcceptedPeers, IdentityCallback};
use futures::future::{self, BoxFuture};
use futures::FutureExt as _;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, ProtocolVersion, ServerConfig};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// ALPN protocols offered by every session, in preference order.
pub const ALPN_PROTOCOLS: [&[u8]; 3] = [b"grpc-exp", b"h2", b"http/1.1"];

/// Builds a [`SessionConfig`].
///
/// # Examples
///
/// ```no_run
/// use aprn_rustls::{session_config, Identity, NoopMetrics, Scheme};
/// use std::sync::Arc;
///
/// # fn example(
/// #     credential: Arc<rustls::sign::CertifiedKey>,
/// #     sdr_roots: Vec<rustls::pki_types::CertificateDer<'static>>,
/// # ) -> Result<(), aprn_rustls::Error> {
/// let session = session_config(
///     move || Some(credential.clone()),
///     Some(vec![Identity::new("sdr", "node-42")]),
///     Arc::new(NoopMetrics),
/// )
/// .roots(Scheme::Sdr, sdr_roots)
/// .build()?;
///
/// let server_config = session.server_config()?;
/// # Ok(())
/// # }
/// ```
pub struct SessionConfigBuilder {
    challenge: IdentityCallback,
    expected: Option<Vec<Identity>>,
    metrics: Arc<dyn MetricsSink>,
    roots: Vec<(Scheme, Vec<CertificateDer<'static>>)>,
    engine: Option<Arc<dyn TrustEngine>>,
    executor: Option<Arc<dyn VerifyExecutor>>,
    extractors: Option<Extractors>,
    marker_oid: Option<String>,
    evaluation_timeout: Option<Duration>,
}

impl fmt::Debug for SessionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfigBuilder")
            .field("challenge", &"<identity callback>")
            .field("expected", &self.expected)
            .field("metrics", &"<Arc<dyn MetricsSink>>")
            .field(
                "roots",
                &self
                    .roots
                    .iter()
                    .map(|(scheme, certs)| (*scheme, certs.len()))
                    .collect::<Vec<_>>(),
            )
            .field("engine", &self.engine)
            .field("executor", &self.executor)
            .field("extractors", &self.extractors.is_some())
            .field("marker_oid", &self.marker_oid)
            .field("evaluation_timeout", &self.evaluation_timeout)
            .finish()
    }
}

impl SessionConfigBuilder {
    /// Creates a builder.
    ///
    /// `challenge` supplies the local credential for every handshake.
    /// `expected` lists the peers to accept; `None` or an empty list turns
    /// peer authentication off. Rejections are counted on `metrics`.
    pub fn new<F>(challenge: F, expected: Option<Vec<Identity>>, metrics: Arc<dyn MetricsSink>) -> Self
    where
        F: Fn() -> Option<Arc<CertifiedKey>> + Send + Sync + 'static,
    {
        Self {
            challenge: Arc::new(challenge),
            expected,
            metrics,
            roots: Vec::new(),
            engine: None,
            executor: None,
            extractors: None,
            marker_oid: None,
            evaluation_timeout: None,
        }
    }

    /// Adds root certificates for `scheme`. May be called once per scheme or
    /// repeatedly; all roots end up in one anchor set.
    #[must_use]
    pub fn roots(mut self, scheme: Scheme, certs: Vec<CertificateDer<'static>>) -> Self {
        self.roots.push((scheme, certs));
        self
    }

    /// Replaces the default webpki trust engine.
    #[must_use]
    pub fn engine(mut self, engine: Arc<dyn TrustEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Runs verification on `executor` instead of a dedicated thread.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn VerifyExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Replaces the reference extraction strategies.
    #[must_use]
    pub fn extractors(mut self, extractors: Extractors) -> Self {
        self.extractors = Some(extractors);
        self
    }

    /// Sets the dotted OID of the narrative marker extension.
    #[must_use]
    pub fn marker_oid(mut self, oid: impl Into<String>) -> Self {
        self.marker_oid = Some(oid.into());
        self
    }

    /// Rejects attempts whose trust evaluation takes longer than `timeout`.
    ///
    /// Off by default: an engine that never finishes stalls its handshake.
    #[must_use]
    pub fn evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation_timeout = Some(timeout);
        self
    }

    /// Applies settings loaded from configuration.
    ///
    /// Non-empty `expected_peers` replace the expected list; the timeout and
    /// marker OID are applied when present.
    #[must_use]
    pub fn settings(mut self, settings: &PeerAuthSettings) -> Self {
        if !settings.expected_peers.is_empty() {
            self.expected = Some(settings.expected_peers.clone());
        }
        if let Some(timeout) = settings.evaluation_timeout() {
            self.evaluation_timeout = Some(timeout);
        }
        if let Some(oid) = &settings.marker_oid {
            self.marker_oid = Some(oid.clone());
        }
        self
    }

    /// Validates the expected peers and assembles the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownIdentityDomain`](crate::Error::UnknownIdentityDomain)
    /// naming the first expected identity outside
    /// [`SUPPORTED_DOMAINS`](crate::SUPPORTED_DOMAINS), or
    /// [`Error::Executor`](crate::Error::Executor) if the verification thread
    /// cannot be started.
    pub fn build(self) -> Result<SessionConfig> {
        crypto::ensure_crypto_provider_installed();

        let alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();
        let expected = self.expected.unwrap_or_default();

        if expected.is_empty() {
            warn!("Peer validation disabled: no expected peer identities configured");
            return Ok(SessionConfig {
                challenge: self.challenge,
                evaluator: None,
                alpn_protocols,
                peers: Arc::new(AcceptedPeers::new()),
            });
        }

        let expected = ExpectedIdentities::validate(expected, SUPPORTED_DOMAINS)?;
        info!("Peer validation enabled; expected peers: {expected}");

        let detector = self
            .marker_oid
            .map(SchemeDetector::new)
            .unwrap_or_default();
        let mut evaluator = AsyncTrustEvaluator::builder(expected, TrustAnchorSet::new(self.roots))
            .detector(detector)
            .metrics(self.metrics)
            .timeout(self.evaluation_timeout);
        if let Some(engine) = self.engine {
            evaluator = evaluator.engine(engine);
        }
        if let Some(executor) = self.executor {
            evaluator = evaluator.executor(executor);
        }
        if let Some(extractors) = self.extractors {
            evaluator = evaluator.extractors(extractors);
        }

        Ok(SessionConfig {
            challenge: self.challenge,
            evaluator: Some(evaluator.build()?),
            alpn_protocols,
            peers: Arc::new(AcceptedPeers::new()),
        })
    }
}

/// A built session configuration.
///
/// Converts into rustls server and client configurations; both share the
/// same evaluator and remember which identity each accepted peer matched.
#[derive(Clone)]
pub struct SessionConfig {
    challenge: IdentityCallback,
    evaluator: Option<AsyncTrustEvaluator>,
    alpn_protocols: Vec<Vec<u8>>,
    peers: Arc<AcceptedPeers>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("min_protocol_version", &self.min_protocol_version())
            .field("alpn_protocols", &self.alpn_protocols)
            .field("peer_certificate_required", &self.peer_certificate_required())
            .field("verifier", &self.evaluator)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    /// Lowest TLS version negotiated. Only TLS 1.3 is enabled.
    pub fn min_protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::TLSv1_3
    }

    /// ALPN protocols, in preference order.
    pub fn alpn_protocols(&self) -> &[Vec<u8>] {
        &self.alpn_protocols
    }

    /// Whether peers must present a certificate.
    pub fn peer_certificate_required(&self) -> bool {
        self.evaluator.is_some()
    }

    /// The verification hook, absent when peer authentication is disabled.
    pub fn verifier(&self) -> Option<&AsyncTrustEvaluator> {
        self.evaluator.as_ref()
    }

    /// The expected identity a handshake accepted for the peer presenting
    /// `leaf`.
    ///
    /// Only recent peers are remembered; `None` for peers never accepted,
    /// long evicted, or when peer authentication is disabled.
    pub fn peer_identity(&self, leaf: &CertificateDer<'_>) -> Option<Identity> {
        self.peers.lookup(leaf)
    }

    /// The expected identity matched by the peer that presented `peer_certs`,
    /// leaf first.
    ///
    /// Answers from the accepted-peer cache when it can. On a miss the chain
    /// is evaluated again, which covers peers evicted from the cache and
    /// resumed sessions whose handshake skipped verification. Pass the dialed
    /// `server_name` when the peer is a server. Resolves to `None` when peer
    /// authentication is disabled or the chain matches no expected identity.
    pub fn identify_peer(
        &self,
        peer_certs: &[CertificateDer<'_>],
        server_name: Option<ServerName<'static>>,
    ) -> BoxFuture<'static, Option<Identity>> {
        let Some((leaf, intermediates)) = peer_certs.split_first() else {
            return future::ready(None).boxed();
        };
        if let Some(identity) = self.peers.lookup(leaf) {
            return future::ready(Some(identity)).boxed();
        }
        let Some(evaluator) = &self.evaluator else {
            return future::ready(None).boxed();
        };

        debug!("peer missing from accepted-peer cache; evaluating its chain again");
        let leaf = leaf.clone().into_owned();
        let mut presented = PresentedChain::new(
            leaf.clone(),
            intermediates.iter().map(|c| c.clone().into_owned()).collect(),
            UnixTime::now(),
        );
        if let Some(name) = server_name {
            presented = presented.with_server_name(name);
        }
        let identity = evaluator.identify(presented);
        let peers = Arc::clone(&self.peers);
        async move {
            let identity = identity.await?;
            peers.remember(&leaf, identity.clone());
            Some(identity)
        }
        .boxed()
    }

    /// A rustls server configuration for this session.
    ///
    /// # Errors
    ///
    /// Returns an error if rustls rejects the protocol settings.
    pub fn server_config(&self) -> Result<ServerConfig> {
        build_server_config(
            Arc::clone(&self.challenge),
            self.evaluator.clone(),
            Arc::clone(&self.peers),
            self.alpn_protocols.clone(),
        )
    }

    /// A rustls client configuration for this session.
    ///
    /// # Errors
    ///
    /// Returns an error if rustls rejects the protocol settings.
    pub fn client_config(&self) -> Result<ClientConfig> {
        build_client_config(
            Arc::clone(&self.challenge),
            self.evaluator.clone(),
            Arc::clone(&self.peers),
            self.alpn_protocols.clone(),
        )
    }
}
