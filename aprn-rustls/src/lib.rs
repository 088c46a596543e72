#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # aprn-rustls
//!
//! `aprn-rustls` authenticates mutual-TLS peers by APRN, the canonical
//! `domain:identifier` resource name of a workload.
//!
//! During the handshake the peer's chain is evaluated against the union of
//! the trusted roots of every identity scheme. The leaf's scheme is detected
//! from a marker extension, the scheme's strategy extracts the peer's
//! identities from the trusted chain, and the connection is accepted only if
//! one of them is an expected peer.
//!
//! Evaluation is asynchronous and pluggable ([`engine::TrustEngine`]); it runs
//! on a dedicated serial executor and every attempt completes exactly once.
//! Rejections are counted by reason on
//! [`VERIFICATION_ERROR_COUNTER`](crate::VERIFICATION_ERROR_COUNTER); the
//! peer only sees a generic alert.
//!
//! TLS itself and all cryptography are delegated to `rustls`.
//!
//! ## Feature flags
//!
//! Exactly **one** `rustls` crypto provider must be enabled:
//!
//! * `ring` (default)
//! * `aws-lc-rs`
//!
//! Enabling more than one provider results in a compile-time error.
//!
//! Diagnostics go to `log` (`logging`, default) or `tracing` (`tracing`).
//! `metrics` adds [`MetricsFacade`](crate::MetricsFacade), a sink for the
//! `metrics` crate.

#[cfg(all(feature = "ring", feature = "aws-lc-rs"))]
compile_error!("Enable only one crypto provider feature: `ring` or `aws-lc-rs`.");

#[cfg(not(any(feature = "ring", feature = "aws-lc-rs")))]
compile_error!("Enable one crypto provider feature: `ring` (default) or `aws-lc-rs`.");

pub mod engine;
pub mod executor;
pub mod extract;

mod anchors;
mod completion;
mod config;
mod crypto;
mod error;
mod evaluator;
mod failure;
mod identity;
mod scheme;

mod observability;
mod prelude;

mod client;
mod server;
mod session;
mod verifier;

#[cfg(test)]
mod testutil;

// Public re-exports
pub use anchors::{certs_from_der, TrustAnchorSet};
pub use completion::VerificationOutcome;
pub use config::PeerAuthSettings;
pub use engine::{PresentedChain, TrustEngine, WebPkiTrustEngine};
pub use error::{Error, Result};
pub use evaluator::{AsyncTrustEvaluator, EvaluatorBuilder};
pub use executor::{InlineExecutor, SerialExecutor, VerifyExecutor};
pub use extract::{Extractors, IdentityExtractor, NarrativeExtractor, SdrTranslator};
#[cfg(feature = "metrics")]
pub use failure::MetricsFacade;
pub use failure::{
    FailureKind, FailureReporter, MetricsSink, NoopMetrics, FAILURE_REASON_TAG,
    VERIFICATION_ERROR_COUNTER,
};
pub use identity::{ExpectedIdentities, Identity, SUPPORTED_DOMAINS};
pub use scheme::{Scheme, SchemeDetector, NARRATIVE_MARKER_OID};
pub use session::{SessionConfig, SessionConfigBuilder, ALPN_PROTOCOLS};
pub use verifier::IdentityCallback;

/// Constructor for the session configuration builder.
///
/// `challenge` supplies the local credential, `expected` the peers to accept
/// (`None` or empty disables peer authentication) and `metrics` receives one
/// increment per rejected peer.
///
/// # Examples
///
/// ```no_run
/// use aprn_rustls::{session_config, Identity, NoopMetrics, Scheme};
/// use std::sync::Arc;
///
/// # fn example(
/// #     credential: Arc<rustls::sign::CertifiedKey>,
/// #     roots: Vec<rustls::pki_types::CertificateDer<'static>>,
/// # ) -> Result<(), aprn_rustls::Error> {
/// let session = session_config(
///     move || Some(credential.clone()),
///     Some(vec!["aci-kube:ns/frontend".parse::<Identity>()?]),
///     Arc::new(NoopMetrics),
/// )
/// .roots(Scheme::Narrative, roots)
/// .build()?;
///
/// let client_config = session.client_config()?;
/// # Ok(())
/// # }
/// ```
pub fn session_config<F>(
    challenge: F,
    expected: Option<Vec<Identity>>,
    metrics: std::sync::Arc<dyn MetricsSink>,
) -> SessionConfigBuilder
where
    F: Fn() -> Option<std::sync::Arc<rustls::sign::CertifiedKey>> + Send + Sync + 'static,
{
    SessionConfigBuilder::new(challenge, expected, metrics)
}
