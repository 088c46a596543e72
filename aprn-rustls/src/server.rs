use crate::crypto;
use crate::error::Result;
use crate::evaluator::AsyncTrustEvaluator;
use crate::verifier::{AcceptedPeers, ChallengeServerResolver, HandshakeClientVerifier, IdentityCallback};
use rustls::ServerConfig;
use std::sync::Arc;

/// Builds the server half of a session configuration.
///
/// * presents the credential returned by the identity callback
/// * accepts TLS 1.3 only
/// * with an evaluator, requires a client certificate and authenticates the
///   client by APRN; without one, does not ask for a client certificate
pub(crate) fn build_server_config(
    challenge: IdentityCallback,
    evaluator: Option<AsyncTrustEvaluator>,
    peers: Arc<AcceptedPeers>,
    alpn_protocols: Vec<Vec<u8>>,
) -> Result<ServerConfig> {
    let builder = ServerConfig::builder_with_provider(crypto::provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?;

    let builder = match evaluator {
        Some(evaluator) => {
            builder.with_client_cert_verifier(Arc::new(HandshakeClientVerifier::new(evaluator, peers)))
        }
        None => builder.with_no_client_auth(),
    };

    let mut cfg = builder.with_cert_resolver(Arc::new(ChallengeServerResolver::new(challenge)));
    cfg.alpn_protocols = alpn_protocols;
    Ok(cfg)
}
