//! Asynchronous peer verification: trust evaluation, scheme dispatch,
//! identity extraction and matching.
//!
//! Every attempt runs on the configured [`VerifyExecutor`] and completes
//! exactly once, through a [`Completion`] it owns. Rejections are counted in
//! metrics before the outcome is delivered.

use crate::anchors::TrustAnchorSet;
use crate::completion::{Completion, VerificationOutcome};
use crate::engine::{PresentedChain, TrustEngine, TrustEvaluation, WebPkiTrustEngine};
use crate::error::Result;
use crate::executor::{SerialExecutor, VerifyExecutor};
use crate::extract::{Extractors, TrustedChain};
use crate::failure::{FailureKind, FailureReporter, MetricsSink, NoopMetrics};
use crate::identity::{ExpectedIdentities, Identity};
use crate::prelude::{debug, warn};
use crate::scheme::SchemeDetector;
use futures::channel::oneshot;
use futures::FutureExt as _;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Verifies presented certificate chains against the expected peers.
///
/// Cheap to clone. All clones share the anchors, engine, strategies and
/// executor.
#[derive(Clone)]
pub struct AsyncTrustEvaluator {
    shared: Arc<Shared>,
    executor: Arc<dyn VerifyExecutor>,
}

impl fmt::Debug for AsyncTrustEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTrustEvaluator")
            .field("expected", &self.shared.expected)
            .field("engine", &self.shared.engine)
            .field("executor", &self.executor)
            .field("timeout", &self.shared.timeout)
            .finish_non_exhaustive()
    }
}

struct Shared {
    expected: ExpectedIdentities,
    anchors: TrustAnchorSet,
    engine: Arc<dyn TrustEngine>,
    detector: SchemeDetector,
    extractors: Extractors,
    reporter: FailureReporter,
    timeout: Option<Duration>,
}

/// Builds an [`AsyncTrustEvaluator`].
///
/// Defaults: [`WebPkiTrustEngine`], a fresh [`SerialExecutor`], the
/// reference extraction strategies, [`NoopMetrics`] and no timeout.
pub struct EvaluatorBuilder {
    expected: ExpectedIdentities,
    anchors: TrustAnchorSet,
    engine: Option<Arc<dyn TrustEngine>>,
    executor: Option<Arc<dyn VerifyExecutor>>,
    detector: SchemeDetector,
    extractors: Option<Extractors>,
    metrics: Arc<dyn MetricsSink>,
    timeout: Option<Duration>,
}

impl fmt::Debug for EvaluatorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorBuilder")
            .field("expected", &self.expected)
            .field("anchors", &self.anchors.certificates().len())
            .field("engine", &self.engine)
            .field("executor", &self.executor)
            .field("detector", &self.detector)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl EvaluatorBuilder {
    /// Sets the trust engine.
    #[must_use]
    pub fn engine(mut self, engine: Arc<dyn TrustEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Sets the executor attempts run on.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn VerifyExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Sets the scheme detector.
    ///
    /// Unless [`extractors`](Self::extractors) is also set, the reference
    /// narrative strategy follows the detector's marker OID.
    #[must_use]
    pub fn detector(mut self, detector: SchemeDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Sets the extraction strategies.
    #[must_use]
    pub fn extractors(mut self, extractors: Extractors) -> Self {
        self.extractors = Some(extractors);
        self
    }

    /// Sets the metrics sink failures are reported to.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Bounds how long the trust engine may take. Unbounded by default.
    ///
    /// Honoured only on executors that drive a tokio timer, such as
    /// [`SerialExecutor`]; elsewhere it is dropped with a warning.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the evaluator, starting a [`SerialExecutor`] if none was set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Executor`](crate::Error::Executor) if the executor
    /// thread cannot be started.
    pub fn build(self) -> Result<AsyncTrustEvaluator> {
        let executor: Arc<dyn VerifyExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(SerialExecutor::new(SerialExecutor::DEFAULT_NAME)?),
        };
        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(WebPkiTrustEngine::default()));
        let extractors = self
            .extractors
            .unwrap_or_else(|| Extractors::reference(self.detector.marker_oid()));
        let timeout = match self.timeout {
            Some(limit) if !executor.drives_tokio_timer() => {
                warn!("evaluation timeout of {limit:?} ignored: {executor:?} has no tokio timer");
                None
            }
            timeout => timeout,
        };

        Ok(AsyncTrustEvaluator {
            shared: Arc::new(Shared {
                expected: self.expected,
                anchors: self.anchors,
                engine,
                detector: self.detector,
                extractors,
                reporter: FailureReporter::new(self.metrics),
                timeout,
            }),
            executor,
        })
    }
}

impl AsyncTrustEvaluator {
    /// Starts building an evaluator that accepts peers in `expected`, anchored
    /// in `anchors`.
    pub fn builder(expected: ExpectedIdentities, anchors: TrustAnchorSet) -> EvaluatorBuilder {
        EvaluatorBuilder {
            expected,
            anchors,
            engine: None,
            executor: None,
            detector: SchemeDetector::default(),
            extractors: None,
            metrics: Arc::new(NoopMetrics),
            timeout: None,
        }
    }

    /// The identities a peer must match one of.
    pub fn expected(&self) -> &ExpectedIdentities {
        &self.shared.expected
    }

    /// The anchors chains are evaluated against.
    pub fn anchors(&self) -> &TrustAnchorSet {
        &self.shared.anchors
    }

    /// Verifies `presented`, calling `on_complete` exactly once with the outcome.
    ///
    /// Returns immediately; `on_complete` runs on the executor (or on the
    /// calling thread if the attempt could not be scheduled).
    pub fn verify<F>(&self, presented: PresentedChain, on_complete: F)
    where
        F: FnOnce(VerificationOutcome) + Send + 'static,
    {
        let completion = Completion::callback(Box::new(on_complete), self.shared.reporter.clone());
        self.submit(presented, completion);
    }

    /// Verifies `presented`, resolving to the outcome.
    ///
    /// Dropping the returned future abandons the attempt without reporting it.
    pub fn evaluate(
        &self,
        presented: PresentedChain,
    ) -> impl Future<Output = VerificationOutcome> + Send + 'static {
        let (completion, rx) = Completion::channel(self.shared.reporter.clone());
        self.submit(presented, completion);
        rx.map(|outcome| {
            outcome.unwrap_or(VerificationOutcome::Rejected(
                FailureKind::EvaluationCallbackNotInvoked,
            ))
        })
    }

    /// Verifies `presented`, blocking the calling thread until the outcome
    /// is known.
    ///
    /// This is what the rustls hooks call: the handshake cannot proceed until
    /// the peer is decided. Must not be called from the executor's own thread.
    pub fn verify_blocking(&self, presented: PresentedChain) -> VerificationOutcome {
        futures::executor::block_on(self.evaluate(presented))
    }

    /// Works out which expected identity `presented` matches, without
    /// reporting or logging a rejection.
    ///
    /// For chains a handshake already accepted, when the outcome of that
    /// attempt is no longer at hand.
    pub fn identify(
        &self,
        presented: PresentedChain,
    ) -> impl Future<Output = Option<Identity>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let task = async move {
            let _ = tx.send(shared.attempt(presented).await.ok());
        }
        .boxed();
        if self.executor.spawn(task).is_err() {
            debug!("verification executor is closed; peer identity unknown");
        }
        rx.map(|identity| identity.ok().flatten())
    }

    fn submit(&self, presented: PresentedChain, completion: Completion) {
        let shared = Arc::clone(&self.shared);
        let task = async move { shared.run(presented, completion).await }.boxed();
        if self.executor.spawn(task).is_err() {
            warn!("verification executor is closed; peer will be rejected");
        }
    }
}

impl Shared {
    async fn run(&self, presented: PresentedChain, completion: Completion) {
        if completion.is_canceled() {
            debug!("verification attempt abandoned before it started");
            return;
        }
        match self.attempt(presented).await {
            Ok(identity) => {
                debug!("peer authenticated as {identity}");
                completion.accept(identity);
            }
            Err(kind) => completion.reject(kind),
        }
    }

    async fn attempt(&self, presented: PresentedChain) -> std::result::Result<Identity, FailureKind> {
        // 1. anchors
        let mut trust = self.engine.trust_for(presented);
        trust
            .set_anchor_certificates(&self.anchors)
            .map_err(|e| {
                debug!("failed to install trust anchors: {e}");
                FailureKind::UntrustedRootCA
            })?;

        // 2. start evaluation
        let evaluation = trust.evaluate().map_err(|e| {
            debug!("failed to start trust evaluation: {e}");
            FailureKind::EvaluationCallbackNotInvoked
        })?;

        // `timeout` is only set when the executor drives a tokio timer.
        let evaluation = match self.timeout {
            None => evaluation.await,
            Some(limit) => tokio::time::timeout(limit, evaluation).await.map_err(|_| {
                debug!("trust evaluation did not finish within {limit:?}");
                FailureKind::EvaluationTimeout
            })?,
        };

        // 3. trust result
        let chain = match evaluation {
            TrustEvaluation::Trusted { chain: Some(chain) } => chain,
            TrustEvaluation::Trusted { chain: None } => {
                debug!("trust evaluation succeeded without a chain");
                return Err(FailureKind::UnexpectedNoCertChain);
            }
            TrustEvaluation::Untrusted { error: Some(e) } => {
                debug!("peer certificate chain is not trusted: {e}");
                return Err(FailureKind::InvalidCertChain);
            }
            TrustEvaluation::Untrusted { error: None } => {
                debug!("peer certificate chain is not trusted; engine gave no reason");
                return Err(FailureKind::UnexpectedCertEvaluationFailure);
            }
        };

        // 4. chain shape
        let chain = match TrustedChain::parse(&chain) {
            None => {
                debug!("trust evaluation returned an empty chain");
                return Err(FailureKind::UnexpectedNoCertChain);
            }
            Some(Err(index)) => {
                debug!("certificate {index} of the evaluated chain is not X.509");
                return Err(FailureKind::NotAnX509Cert);
            }
            Some(Ok(chain)) => chain,
        };

        // 5. scheme
        let scheme = self.detector.detect(chain.leaf());

        // 6. identities
        let identities = self
            .extractors
            .for_scheme(scheme)
            .extract(&chain)
            .map_err(|e| {
                debug!(
                    "{scheme} identity extraction failed for chain {:?}: {e}",
                    chain.subjects()
                );
                scheme.extraction_failure()
            })?;

        // 7. match
        self.expected.first_match(&identities).cloned().ok_or_else(|| {
            debug!(
                "none of the peer identities {identities:?} is expected (expected {})",
                self.expected
            );
            FailureKind::UntrustedAPRN
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutorClosed, InlineExecutor, VerifyTask};
    use crate::extract::ExtractionError;
    use crate::identity::SUPPORTED_DOMAINS;
    use crate::testutil::{presented, Pki, RecordingMetrics, Script, ScriptedEngine};
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    fn expected(ids: &[&str]) -> ExpectedIdentities {
        ExpectedIdentities::validate(
            ids.iter().map(|s| s.parse::<Identity>().unwrap()),
            SUPPORTED_DOMAINS,
        )
        .unwrap()
    }

    struct Harness {
        pki: Pki,
        metrics: Arc<RecordingMetrics>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                pki: Pki::new("root"),
                metrics: RecordingMetrics::new(),
            }
        }

        fn builder(&self, ids: &[&str]) -> EvaluatorBuilder {
            AsyncTrustEvaluator::builder(expected(ids), self.pki.anchors())
                .executor(Arc::new(InlineExecutor))
                .metrics(self.metrics.clone())
        }

        fn sdr_chain(&self, cn: &str) -> Vec<rustls::pki_types::CertificateDer<'static>> {
            let leaf = self.pki.leaf(&self.pki.root, cn, &[], false);
            vec![leaf.der(), self.pki.root_der()]
        }
    }

    /// Runs one attempt through the callback form and checks it completed once.
    fn verify_once(evaluator: &AsyncTrustEvaluator, chain: PresentedChain) -> VerificationOutcome {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        evaluator.verify(chain, move |outcome| sink.lock().unwrap().push(outcome));
        let mut outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1, "attempt must complete exactly once");
        outcomes.remove(0)
    }

    #[test]
    fn sdr_peer_in_expected_set_is_accepted_without_reports() {
        let h = Harness::new();
        let leaf = h.pki.leaf(&h.pki.root, "node-42", &[], false);
        let evaluator = h.builder(&["sdr:node-42"]).build().unwrap();

        let outcome = verify_once(&evaluator, presented(&leaf, &[]));

        assert_eq!(
            outcome,
            VerificationOutcome::Accepted(Identity::new("sdr", "node-42"))
        );
        assert!(h.metrics.reasons().is_empty());
    }

    #[test]
    fn narrative_peer_matches_first_expected_identity() {
        let h = Harness::new();
        let int = h.pki.intermediate("narrative int", true);
        let leaf = h.pki.leaf(
            &int,
            "pod",
            &["aprn:aci-kube:ns/a", "aprn:aci-kube:ns/b"],
            true,
        );
        let evaluator = h
            .builder(&["aci-kube:ns/b", "aci-kube:ns/a"])
            .build()
            .unwrap();

        let outcome = verify_once(&evaluator, presented(&leaf, &[&int]));

        assert_eq!(outcome.identity(), Some(&Identity::new("aci-kube", "ns/b")));
        assert!(h.metrics.reasons().is_empty());
    }

    #[test]
    fn mismatched_identity_is_untrusted_aprn() {
        let h = Harness::new();
        let leaf = h.pki.leaf(&h.pki.root, "node-7", &[], false);
        let evaluator = h.builder(&["sdr:node-42"]).build().unwrap();

        let outcome = verify_once(&evaluator, presented(&leaf, &[]));

        assert_eq!(outcome.failure(), Some(FailureKind::UntrustedAPRN));
        assert_eq!(h.metrics.reasons(), vec!["untrusted_aprn"]);
    }

    #[test]
    fn chain_from_unknown_root_is_invalid() {
        let h = Harness::new();
        let stranger = Pki::new("stranger");
        let leaf = stranger.leaf(&stranger.root, "node-42", &[], false);
        let evaluator = h.builder(&["sdr:node-42"]).build().unwrap();

        let outcome = verify_once(&evaluator, presented(&leaf, &[]));

        assert_eq!(outcome.failure(), Some(FailureKind::InvalidCertChain));
        assert_eq!(h.metrics.reasons(), vec!["invalid_cert_chain"]);
    }

    #[test]
    fn narrative_leaf_under_unmarked_issuer_fails_extraction() {
        let h = Harness::new();
        let int = h.pki.intermediate("plain int", false);
        let leaf = h.pki.leaf(&int, "pod", &["aprn:aci-kube:ns/a"], true);
        let evaluator = h.builder(&["aci-kube:ns/a"]).build().unwrap();

        let outcome = verify_once(&evaluator, presented(&leaf, &[&int]));

        assert_eq!(outcome.failure(), Some(FailureKind::AprnExtractionFailure));
        assert_eq!(h.metrics.reasons(), vec!["aprn_extraction_failure"]);
    }

    #[test]
    fn marked_lookalike_issuer_does_not_satisfy_narrative_extraction() {
        let h = Harness::new();
        let int = h.pki.intermediate("int", false);
        let leaf = h.pki.leaf(&int, "pod", &["aprn:aci-kube:ns/a"], true);
        let rogue = Pki::new("root").intermediate("int", true);
        let evaluator = h.builder(&["aci-kube:ns/a"]).build().unwrap();

        let honest = verify_once(&evaluator, presented(&leaf, &[&int]));
        let padded = verify_once(&evaluator, presented(&leaf, &[&rogue, &int]));

        assert_eq!(honest.failure(), Some(FailureKind::AprnExtractionFailure));
        assert_eq!(padded, honest);
        assert_eq!(
            h.metrics.reasons(),
            vec!["aprn_extraction_failure", "aprn_extraction_failure"]
        );
    }

    #[test]
    fn sdr_computation_failure_is_reported() {
        let h = Harness::new();
        let leaf = h.pki.leaf(&h.pki.root, "node-42", &[], false);
        let failing = |_: &TrustedChain<'_>| -> std::result::Result<Vec<Identity>, ExtractionError> {
            Err(ExtractionError::Other("translator offline".into()))
        };
        let evaluator = h
            .builder(&["sdr:node-42"])
            .extractors(Extractors::default().with_sdr(failing))
            .build()
            .unwrap();

        let outcome = verify_once(&evaluator, presented(&leaf, &[]));

        assert_eq!(outcome.failure(), Some(FailureKind::AprnComputationFailure));
        assert_eq!(h.metrics.reasons(), vec!["aprn_computation_failure"]);
    }

    #[test]
    fn every_injected_failure_completes_once_with_one_report() {
        let h = Harness::new();
        let leaf = h.pki.leaf(&h.pki.root, "node-42", &[], false);
        let cases = [
            (Script::RejectAnchors, FailureKind::UntrustedRootCA),
            (Script::FailToStart, FailureKind::EvaluationCallbackNotInvoked),
            (Script::UntrustedWithError, FailureKind::InvalidCertChain),
            (
                Script::UntrustedSilently,
                FailureKind::UnexpectedCertEvaluationFailure,
            ),
            (
                Script::TrustedWithoutChain,
                FailureKind::UnexpectedNoCertChain,
            ),
            (
                Script::Trusted(Vec::new()),
                FailureKind::UnexpectedNoCertChain,
            ),
            (
                Script::Trusted(vec![rustls::pki_types::CertificateDer::from(vec![1, 2, 3])]),
                FailureKind::NotAnX509Cert,
            ),
            (
                Script::Trusted(vec![h.sdr_chain("node-42")[0].clone()]),
                FailureKind::AprnComputationFailure,
            ),
            (
                Script::Trusted(h.sdr_chain("node-7")),
                FailureKind::UntrustedAPRN,
            ),
        ];

        for (script, kind) in cases {
            let metrics = RecordingMetrics::new();
            let evaluator = h
                .builder(&["sdr:node-42"])
                .engine(Arc::new(ScriptedEngine::new(script.clone())))
                .metrics(metrics.clone())
                .build()
                .unwrap();

            let outcome = verify_once(&evaluator, presented(&leaf, &[]));

            assert_eq!(outcome, VerificationOutcome::Rejected(kind), "{script:?}");
            assert_eq!(metrics.reasons(), vec![kind.as_str()], "{script:?}");
        }
    }

    #[test]
    fn untrusted_engine_skips_extraction() {
        let h = Harness::new();
        let leaf = h.pki.leaf(&h.pki.root, "node-42", &[], false);
        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);
        let spy = move |_: &TrustedChain<'_>| -> std::result::Result<Vec<Identity>, ExtractionError> {
            *flag.lock().unwrap() = true;
            Ok(vec![Identity::new("sdr", "node-42")])
        };
        let evaluator = h
            .builder(&["sdr:node-42"])
            .engine(Arc::new(ScriptedEngine::new(Script::UntrustedWithError)))
            .extractors(Extractors::default().with_sdr(spy))
            .build()
            .unwrap();

        let outcome = verify_once(&evaluator, presented(&leaf, &[]));

        assert_eq!(outcome.failure(), Some(FailureKind::InvalidCertChain));
        assert!(!*called.lock().unwrap());
    }

    #[test]
    fn outcomes_are_deterministic() {
        let h = Harness::new();
        let good = h.pki.leaf(&h.pki.root, "node-42", &[], false);
        let bad = h.pki.leaf(&h.pki.root, "node-9", &[], false);
        let evaluator = h.builder(&["sdr:node-42"]).build().unwrap();

        for _ in 0..5 {
            assert!(verify_once(&evaluator, presented(&good, &[])).is_accepted());
            assert_eq!(
                verify_once(&evaluator, presented(&bad, &[])).failure(),
                Some(FailureKind::UntrustedAPRN)
            );
        }
        assert_eq!(h.metrics.reasons().len(), 5);
    }

    #[derive(Debug)]
    struct ClosedExecutor;

    impl VerifyExecutor for ClosedExecutor {
        fn spawn(&self, _task: VerifyTask) -> std::result::Result<(), ExecutorClosed> {
            Err(ExecutorClosed)
        }
    }

    #[test]
    fn closed_executor_rejects_attempt() {
        let h = Harness::new();
        let leaf = h.pki.leaf(&h.pki.root, "node-42", &[], false);
        let evaluator = h
            .builder(&["sdr:node-42"])
            .executor(Arc::new(ClosedExecutor))
            .build()
            .unwrap();

        let outcome = verify_once(&evaluator, presented(&leaf, &[]));

        assert_eq!(
            outcome.failure(),
            Some(FailureKind::EvaluationCallbackNotInvoked)
        );
        assert_eq!(h.metrics.reasons(), vec!["evaluation_callback_not_invoked"]);
    }

    #[test]
    fn serial_executor_drives_concurrent_attempts() {
        let h = Harness::new();
        let evaluator = h
            .builder(&["sdr:node-42"])
            .executor(Arc::new(SerialExecutor::new("verify-concurrent").unwrap()))
            .build()
            .unwrap();

        let leaves: Vec<_> = (0..8)
            .map(|i| {
                let cn = if i % 2 == 0 { "node-42" } else { "node-1" };
                h.pki.leaf(&h.pki.root, cn, &[], false)
            })
            .collect();

        let outcomes = futures::executor::block_on(futures::future::join_all(
            leaves
                .iter()
                .map(|leaf| evaluator.evaluate(presented(leaf, &[]))),
        ));

        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.is_accepted(), i % 2 == 0);
        }
        assert_eq!(h.metrics.reasons().len(), 4);
    }

    #[test]
    fn timeout_is_opt_in() {
        let h = Harness::new();
        let leaf = h.pki.leaf(&h.pki.root, "node-42", &[], false);
        let engine = ScriptedEngine::new(Script::Hang);
        let evaluations = engine.evaluations();
        let evaluator = h
            .builder(&["sdr:node-42"])
            .engine(Arc::new(engine))
            .executor(Arc::new(SerialExecutor::new("verify-timeout").unwrap()))
            .timeout(Some(Duration::from_millis(20)))
            .build()
            .unwrap();

        let outcome = evaluator.verify_blocking(presented(&leaf, &[]));

        assert_eq!(outcome.failure(), Some(FailureKind::EvaluationTimeout));
        assert_eq!(h.metrics.reasons(), vec!["evaluation_timeout"]);
        assert_eq!(evaluations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timeout_is_dropped_without_a_tokio_timer() {
        let h = Harness::new();
        let leaf = h.pki.leaf(&h.pki.root, "node-42", &[], false);
        let evaluator = h
            .builder(&["sdr:node-42"])
            .timeout(Some(Duration::from_millis(20)))
            .build()
            .unwrap();
        assert_eq!(evaluator.shared.timeout, None);

        // A runtime without the time driver would panic on `tokio::time`.
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let outcome = runtime.block_on(evaluator.evaluate(presented(&leaf, &[])));

        assert!(outcome.is_accepted());
        assert!(h.metrics.reasons().is_empty());
    }

    /// Holds tasks until told to run them.
    #[derive(Default)]
    struct ManualExecutor {
        queued: Mutex<Vec<VerifyTask>>,
    }

    impl fmt::Debug for ManualExecutor {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("ManualExecutor")
        }
    }

    impl ManualExecutor {
        fn run_all(&self) {
            let tasks = std::mem::take(&mut *self.queued.lock().unwrap());
            for task in tasks {
                futures::executor::block_on(task);
            }
        }
    }

    impl VerifyExecutor for ManualExecutor {
        fn spawn(&self, task: VerifyTask) -> std::result::Result<(), ExecutorClosed> {
            self.queued.lock().unwrap().push(task);
            Ok(())
        }
    }

    #[test]
    fn abandoned_future_is_not_reported() {
        let h = Harness::new();
        let leaf = h.pki.leaf(&h.pki.root, "node-7", &[], false);
        let executor = Arc::new(ManualExecutor::default());
        let engine = ScriptedEngine::new(Script::UntrustedWithError);
        let evaluations = engine.evaluations();
        let evaluator = h
            .builder(&["sdr:node-42"])
            .executor(executor.clone())
            .engine(Arc::new(engine))
            .build()
            .unwrap();

        drop(evaluator.evaluate(presented(&leaf, &[])));
        executor.run_all();

        assert_eq!(evaluations.load(Ordering::SeqCst), 0);
        assert!(h.metrics.reasons().is_empty());

        let pending = evaluator.evaluate(presented(&leaf, &[]));
        executor.run_all();
        let outcome = futures::executor::block_on(pending);

        assert_eq!(outcome.failure(), Some(FailureKind::InvalidCertChain));
        assert_eq!(h.metrics.reasons(), vec!["invalid_cert_chain"]);
    }

    #[test]
    fn dropped_task_completes_as_not_invoked() {
        let h = Harness::new();
        let leaf = h.pki.leaf(&h.pki.root, "node-42", &[], false);
        let executor = Arc::new(ManualExecutor::default());
        let evaluator = h
            .builder(&["sdr:node-42"])
            .executor(executor.clone())
            .build()
            .unwrap();

        let pending = evaluator.evaluate(presented(&leaf, &[]));
        executor.queued.lock().unwrap().clear();

        assert_eq!(
            futures::executor::block_on(pending).failure(),
            Some(FailureKind::EvaluationCallbackNotInvoked)
        );
        assert_eq!(h.metrics.reasons(), vec!["evaluation_callback_not_invoked"]);
    }
}
