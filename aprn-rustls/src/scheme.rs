//! Identity scheme detection for leaf certificates.

use crate::failure::FailureKind;
use std::fmt;
use x509_parser::certificate::X509Certificate;

/// Extension OID that marks a certificate as belonging to the narrative scheme.
pub const NARRATIVE_MARKER_OID: &str = "1.3.6.1.4.1.57264.77.1";

/// Certificate ecosystems a peer identity can be derived from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scheme {
    /// Leaf carries the marker extension; identities are extracted and one
    /// chain may name several of them.
    Narrative,
    /// Leaf without the marker; a single identity is computed from the chain.
    Sdr,
}

impl Scheme {
    /// The failure reported when this scheme's strategy rejects a chain.
    pub const fn extraction_failure(self) -> FailureKind {
        match self {
            Self::Narrative => FailureKind::AprnExtractionFailure,
            Self::Sdr => FailureKind::AprnComputationFailure,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Narrative => "narrative",
            Self::Sdr => "sdr",
        })
    }
}

/// Classifies leaf certificates by the presence of a marker extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemeDetector {
    marker_oid: String,
}

impl Default for SchemeDetector {
    fn default() -> Self {
        Self::new(NARRATIVE_MARKER_OID)
    }
}

impl SchemeDetector {
    /// A detector that routes certificates carrying `marker_oid` (dotted form)
    /// to [`Scheme::Narrative`].
    pub fn new(marker_oid: impl Into<String>) -> Self {
        Self {
            marker_oid: marker_oid.into(),
        }
    }

    /// The marker extension OID, dotted form.
    pub fn marker_oid(&self) -> &str {
        &self.marker_oid
    }

    /// Selects the scheme for `leaf`.
    ///
    /// Closed-world assumption: anything without the marker is treated as
    /// [`Scheme::Sdr`]. A third scheme needs its own marker test added here,
    /// ahead of the default branch, or its certificates will be routed to the
    /// SDR strategy and fail there.
    pub fn detect(&self, leaf: &X509Certificate<'_>) -> Scheme {
        if has_extension(leaf, &self.marker_oid) {
            Scheme::Narrative
        } else {
            Scheme::Sdr
        }
    }
}

/// Whether `cert` carries an extension with the dotted `oid`.
pub(crate) fn has_extension(cert: &X509Certificate<'_>, oid: &str) -> bool {
    cert.extensions()
        .iter()
        .any(|ext| ext.oid.to_id_string() == oid)
}
