use crate::crypto;
use crate::error::Result;
use crate::evaluator::AsyncTrustEvaluator;
use crate::verifier::{
    AcceptedPeers, ChallengeClientResolver, HandshakeServerVerifier, IdentityCallback,
    SignatureOnlyServerVerifier,
};
use rustls::client::danger::ServerCertVerifier;
use rustls::ClientConfig;
use std::sync::Arc;

/// Builds the client half of a session configuration.
///
/// * presents the credential returned by the identity callback
/// * offers TLS 1.3 only
/// * with an evaluator, authenticates the server by APRN; without one, only
///   checks that the server holds the key of the certificate it sent
pub(crate) fn build_client_config(
    challenge: IdentityCallback,
    evaluator: Option<AsyncTrustEvaluator>,
    peers: Arc<AcceptedPeers>,
    alpn_protocols: Vec<Vec<u8>>,
) -> Result<ClientConfig> {
    let verifier: Arc<dyn ServerCertVerifier> = match evaluator {
        Some(evaluator) => Arc::new(HandshakeServerVerifier::new(evaluator, peers)),
        None => Arc::new(SignatureOnlyServerVerifier::new()),
    };

    let mut cfg = ClientConfig::builder_with_provider(crypto::provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_cert_resolver(Arc::new(ChallengeClientResolver::new(challenge)));
    cfg.alpn_protocols = alpn_protocols;
    Ok(cfg)
}
