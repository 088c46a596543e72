//! Failure taxonomy for verification attempts and the metrics reporting it.

use std::fmt;
use std::sync::Arc;

/// Name of the counter incremented once per rejected verification attempt.
pub const VERIFICATION_ERROR_COUNTER: &str = "aprn_tls_verification_errors_total";

/// Tag carrying [`FailureKind::as_str`] on [`VERIFICATION_ERROR_COUNTER`].
pub const FAILURE_REASON_TAG: &str = "failure_reason";

/// Why a verification attempt was rejected.
///
/// Used for local logging and metrics only. The remote peer never sees it;
/// the handshake fails with a generic alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FailureKind {
    /// The trust anchors could not be installed for the evaluation.
    UntrustedRootCA,
    /// The trust engine rejected the chain with a diagnostic.
    InvalidCertChain,
    /// The trust engine rejected the chain without any diagnostic.
    UnexpectedCertEvaluationFailure,
    /// Evaluation succeeded but produced no certificate chain.
    UnexpectedNoCertChain,
    /// An entry of the evaluated chain is not an X.509 certificate.
    NotAnX509Cert,
    /// The narrative strategy failed to extract identities.
    AprnExtractionFailure,
    /// The SDR strategy failed to compute the identity.
    AprnComputationFailure,
    /// None of the chain's identities is an expected peer.
    UntrustedAPRN,
    /// The asynchronous evaluation could not be started, or the attempt was
    /// dropped before it completed.
    EvaluationCallbackNotInvoked,
    /// The configured evaluation timeout elapsed.
    EvaluationTimeout,
}

impl FailureKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::UntrustedRootCA,
        Self::InvalidCertChain,
        Self::UnexpectedCertEvaluationFailure,
        Self::UnexpectedNoCertChain,
        Self::NotAnX509Cert,
        Self::AprnExtractionFailure,
        Self::AprnComputationFailure,
        Self::UntrustedAPRN,
        Self::EvaluationCallbackNotInvoked,
        Self::EvaluationTimeout,
    ];

    /// Stable, low-cardinality metrics label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UntrustedRootCA => "untrusted_root_ca",
            Self::InvalidCertChain => "invalid_cert_chain",
            Self::UnexpectedCertEvaluationFailure => "unexpected_cert_evaluation_failure",
            Self::UnexpectedNoCertChain => "unexpected_no_cert_chain",
            Self::NotAnX509Cert => "not_an_x509_cert",
            Self::AprnExtractionFailure => "aprn_extraction_failure",
            Self::AprnComputationFailure => "aprn_computation_failure",
            Self::UntrustedAPRN => "untrusted_aprn",
            Self::EvaluationCallbackNotInvoked => "evaluation_callback_not_invoked",
            Self::EvaluationTimeout => "evaluation_timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for counter increments.
///
/// Implement this to integrate with your metrics system. Implementations are
/// called from the verification executor and possibly from several
/// connections at once; they must not block.
///
/// # Example
///
/// ```
/// use aprn_rustls::MetricsSink;
///
/// struct Stderr;
///
/// impl MetricsSink for Stderr {
///     fn increment(&self, counter: &'static str, tags: &[(&'static str, &'static str)]) {
///         eprintln!("{counter} {tags:?}");
///     }
/// }
/// ```
pub trait MetricsSink: Send + Sync {
    /// Increments `counter` by one with the given tags.
    fn increment(&self, counter: &'static str, tags: &[(&'static str, &'static str)]);
}

impl<F> MetricsSink for F
where
    F: Fn(&'static str, &[(&'static str, &'static str)]) + Send + Sync,
{
    fn increment(&self, counter: &'static str, tags: &[(&'static str, &'static str)]) {
        self(counter, tags);
    }
}

/// A sink that drops every increment.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _counter: &'static str, _tags: &[(&'static str, &'static str)]) {}
}

/// Forwards increments to the global [`metrics`] recorder.
#[cfg(feature = "metrics")]
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsFacade;

#[cfg(feature = "metrics")]
impl MetricsSink for MetricsFacade {
    fn increment(&self, counter: &'static str, tags: &[(&'static str, &'static str)]) {
        let labels: Vec<metrics::Label> = tags
            .iter()
            .map(|&(key, value)| metrics::Label::from_static_parts(key, value))
            .collect();
        metrics::counter!(counter, labels).increment(1);
    }
}

/// Records one categorized failure per rejected verification attempt.
#[derive(Clone)]
pub struct FailureReporter {
    sink: Arc<dyn MetricsSink>,
}

impl fmt::Debug for FailureReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureReporter")
            .field("sink", &"<Arc<dyn MetricsSink>>")
            .finish()
    }
}

impl FailureReporter {
    /// Creates a reporter writing to `sink`.
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    /// Increments the verification error counter for `kind`.
    pub fn report(&self, kind: FailureKind) {
        self.sink.increment(
            VERIFICATION_ERROR_COUNTER,
            &[(FAILURE_REASON_TAG, kind.as_str())],
        );
    }
}
