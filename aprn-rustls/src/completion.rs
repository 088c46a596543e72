//! Exactly-once completion of a verification attempt.

use crate::failure::{FailureKind, FailureReporter};
use crate::identity::Identity;
use crate::prelude::error;
use futures::channel::oneshot;

/// Final result of one verification attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// The peer is authenticated as this expected identity.
    Accepted(Identity),
    /// The peer was rejected.
    Rejected(FailureKind),
}

impl VerificationOutcome {
    /// Whether the peer was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// The matched identity, if accepted.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Accepted(identity) => Some(identity),
            Self::Rejected(_) => None,
        }
    }

    /// The failure, if rejected.
    pub fn failure(&self) -> Option<FailureKind> {
        match self {
            Self::Accepted(_) => None,
            Self::Rejected(kind) => Some(*kind),
        }
    }
}

pub(crate) type Callback = Box<dyn FnOnce(VerificationOutcome) + Send>;

enum Sink {
    Callback(Callback),
    Channel(oneshot::Sender<VerificationOutcome>),
}

/// Consuming handle that delivers an attempt's outcome.
///
/// `accept` and `reject` take `self`, so an attempt cannot complete twice. An
/// attempt dropped without completing (executor shut down, task cancelled)
/// completes as [`FailureKind::EvaluationCallbackNotInvoked`].
///
/// Rejections are reported to metrics and logged before delivery, unless
/// nobody is waiting for the outcome anymore.
pub(crate) struct Completion {
    sink: Option<Sink>,
    reporter: FailureReporter,
}

impl Completion {
    pub(crate) fn callback(on_complete: Callback, reporter: FailureReporter) -> Self {
        Self {
            sink: Some(Sink::Callback(on_complete)),
            reporter,
        }
    }

    pub(crate) fn channel(
        reporter: FailureReporter,
    ) -> (Self, oneshot::Receiver<VerificationOutcome>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self {
            sink: Some(Sink::Channel(tx)),
            reporter,
        };
        (completion, rx)
    }

    /// Whether the receiving side has gone away.
    pub(crate) fn is_canceled(&self) -> bool {
        matches!(&self.sink, Some(Sink::Channel(tx)) if tx.is_canceled())
    }

    pub(crate) fn accept(mut self, identity: Identity) {
        self.deliver(VerificationOutcome::Accepted(identity));
    }

    pub(crate) fn reject(mut self, kind: FailureKind) {
        self.reject_in_place(kind);
    }

    fn reject_in_place(&mut self, kind: FailureKind) {
        if self.is_canceled() {
            self.sink = None;
            return;
        }
        error!("peer certificate verification failed: {kind}");
        self.reporter.report(kind);
        self.deliver(VerificationOutcome::Rejected(kind));
    }

    fn deliver(&mut self, outcome: VerificationOutcome) {
        match self.sink.take() {
            Some(Sink::Callback(on_complete)) => on_complete(outcome),
            Some(Sink::Channel(tx)) => {
                let _ = tx.send(outcome);
            }
            None => {}
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.sink.is_some() {
            self.reject_in_place(FailureKind::EvaluationCallbackNotInvoked);
        }
    }
}
