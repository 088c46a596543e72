use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use std::sync::{Arc, OnceLock};

/// Ensures a rustls crypto provider is installed as the process default.
///
/// Idempotent. If the application (or another crate) already installed a
/// provider, that one wins and is used by every configuration built here.
pub(crate) fn ensure_crypto_provider_installed() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let _ = crypto_provider().install_default();
    });
}

/// The provider every configuration and verifier of this crate is built with.
pub(crate) fn provider() -> Arc<CryptoProvider> {
    ensure_crypto_provider_installed();
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(crypto_provider()))
}

/// Signature algorithms used to check handshake signatures (`CertificateVerify`).
pub(crate) fn signature_algorithms() -> WebPkiSupportedAlgorithms {
    provider().signature_verification_algorithms
}

#[cfg(feature = "ring")]
fn crypto_provider() -> CryptoProvider {
    rustls::crypto::ring::default_provider()
}

#[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
fn crypto_provider() -> CryptoProvider {
    rustls::crypto::aws_lc_rs::default_provider()
}
