//! Identity extraction strategies, one per [`Scheme`].

use crate::identity::Identity;
use crate::scheme::{has_extension, Scheme, NARRATIVE_MARKER_OID};
use rustls::pki_types::CertificateDer;
use std::fmt;
use std::sync::Arc;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;

/// URI SAN prefix carrying a narrative identity.
pub const APRN_URI_PREFIX: &str = "aprn:";

/// Domain assigned to identities computed by [`SdrTranslator`].
pub const SDR_DOMAIN: &str = "sdr";

/// A certificate chain the trust engine has accepted, parsed as X.509.
///
/// Ordered leaf first. Never empty.
pub struct TrustedChain<'a> {
    ders: &'a [CertificateDer<'static>],
    parsed: Vec<X509Certificate<'a>>,
}

impl fmt::Debug for TrustedChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.parsed.iter().map(|c| c.subject().to_string()))
            .finish()
    }
}

impl<'a> TrustedChain<'a> {
    /// Parses every entry of `ders`.
    ///
    /// Returns `None` if the chain is empty, or `Some(Err(index))` naming the
    /// first entry that is not an X.509 certificate.
    pub fn parse(ders: &'a [CertificateDer<'static>]) -> Option<Result<Self, usize>> {
        if ders.is_empty() {
            return None;
        }
        let parsed = ders
            .iter()
            .enumerate()
            .map(|(index, der)| {
                x509_parser::parse_x509_certificate(der.as_ref())
                    .map(|(_, cert)| cert)
                    .map_err(|_| index)
            })
            .collect::<Result<Vec<_>, usize>>();
        Some(parsed.map(|parsed| Self { ders, parsed }))
    }

    /// The end-entity certificate.
    pub fn leaf(&self) -> &X509Certificate<'a> {
        &self.parsed[0]
    }

    /// The certificate at `index`, leaf being `0`.
    pub fn get(&self, index: usize) -> Option<&X509Certificate<'a>> {
        self.parsed.get(index)
    }

    /// DER of every certificate, leaf first.
    pub fn certificates(&self) -> &'a [CertificateDer<'static>] {
        self.ders
    }

    /// Number of certificates, anchor included.
    pub fn len(&self) -> usize {
        self.parsed.len()
    }

    /// Always `false`; kept for symmetry with [`len`](Self::len).
    pub fn is_empty(&self) -> bool {
        self.parsed.is_empty()
    }

    /// Subject of every certificate, leaf first. Used in diagnostics.
    pub fn subjects(&self) -> Vec<String> {
        self.parsed.iter().map(|c| c.subject().to_string()).collect()
    }
}

/// Why a strategy could not produce identities for a chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ExtractionError {
    /// The chain is shorter than the scheme's layout requires.
    #[error("unexpected chain length {actual}, need at least {minimum}")]
    UnexpectedChainLength {
        /// Minimum length the strategy accepts.
        minimum: usize,
        /// Length of the evaluated chain.
        actual: usize,
    },

    /// The issuing intermediate lacks the scheme's marker extension.
    #[error("issuing certificate is missing extension {oid}")]
    UnexpectedIntermediateExtension {
        /// The missing extension, dotted form.
        oid: String,
    },

    /// The leaf names no identity.
    #[error("no identities found in leaf certificate")]
    NoIdentities,

    /// An identity in the leaf is malformed.
    #[error("invalid identity {0:?}")]
    InvalidIdentity(String),

    /// The leaf subject has no usable common name.
    #[error("leaf certificate subject has no common name")]
    MissingSubjectName,

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

/// Derives the identities a trusted chain speaks for.
///
/// Implemented for closures, so a custom strategy can be a plain function.
pub trait IdentityExtractor: Send + Sync {
    /// Extracts identities from `chain`.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractionError`] if the chain does not fit the scheme.
    fn extract(&self, chain: &TrustedChain<'_>) -> Result<Vec<Identity>, ExtractionError>;
}

impl<F> IdentityExtractor for F
where
    F: Fn(&TrustedChain<'_>) -> Result<Vec<Identity>, ExtractionError> + Send + Sync,
{
    fn extract(&self, chain: &TrustedChain<'_>) -> Result<Vec<Identity>, ExtractionError> {
        self(chain)
    }
}

fn require_len(chain: &TrustedChain<'_>, minimum: usize) -> Result<(), ExtractionError> {
    if chain.len() < minimum {
        return Err(ExtractionError::UnexpectedChainLength {
            minimum,
            actual: chain.len(),
        });
    }
    Ok(())
}

/// Reads `aprn:<domain>:<identifier>` URI SANs from the leaf.
///
/// The certificate that issued the leaf must also carry the marker
/// extension. Other URI SANs are ignored.
#[derive(Clone, Debug)]
pub struct NarrativeExtractor {
    marker_oid: String,
}

impl Default for NarrativeExtractor {
    fn default() -> Self {
        Self::new(NARRATIVE_MARKER_OID)
    }
}

impl NarrativeExtractor {
    /// An extractor requiring `marker_oid` on the issuing certificate.
    pub fn new(marker_oid: impl Into<String>) -> Self {
        Self {
            marker_oid: marker_oid.into(),
        }
    }
}

impl IdentityExtractor for NarrativeExtractor {
    fn extract(&self, chain: &TrustedChain<'_>) -> Result<Vec<Identity>, ExtractionError> {
        require_len(chain, 2)?;

        let issuer = chain.get(1).ok_or(ExtractionError::UnexpectedChainLength {
            minimum: 2,
            actual: chain.len(),
        })?;
        if !has_extension(issuer, &self.marker_oid) {
            return Err(ExtractionError::UnexpectedIntermediateExtension {
                oid: self.marker_oid.clone(),
            });
        }

        let san = chain
            .leaf()
            .subject_alternative_name()
            .map_err(|e| ExtractionError::Other(format!("subjectAltName: {e}")))?;
        let Some(san) = san else {
            return Err(ExtractionError::NoIdentities);
        };

        let mut identities = Vec::new();
        for name in &san.value.general_names {
            let GeneralName::URI(uri) = name else {
                continue;
            };
            let Some(rest) = uri.strip_prefix(APRN_URI_PREFIX) else {
                continue;
            };
            let identity = rest
                .parse::<Identity>()
                .map_err(|_| ExtractionError::InvalidIdentity((*uri).to_string()))?;
            if !identities.contains(&identity) {
                identities.push(identity);
            }
        }

        if identities.is_empty() {
            return Err(ExtractionError::NoIdentities);
        }
        Ok(identities)
    }
}

/// Computes the single `sdr:<common name>` identity of a leaf.
///
/// The common name is trimmed and lowercased.
#[derive(Clone, Copy, Debug, Default)]
pub struct SdrTranslator;

impl IdentityExtractor for SdrTranslator {
    fn extract(&self, chain: &TrustedChain<'_>) -> Result<Vec<Identity>, ExtractionError> {
        require_len(chain, 2)?;

        let cn = chain
            .leaf()
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::trim)
            .filter(|cn| !cn.is_empty())
            .ok_or(ExtractionError::MissingSubjectName)?;

        Ok(vec![Identity::new(SDR_DOMAIN, cn.to_ascii_lowercase())])
    }
}

/// One extraction strategy per scheme.
#[derive(Clone)]
pub struct Extractors {
    narrative: Arc<dyn IdentityExtractor>,
    sdr: Arc<dyn IdentityExtractor>,
}

impl fmt::Debug for Extractors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extractors")
            .field("narrative", &"<Arc<dyn IdentityExtractor>>")
            .field("sdr", &"<Arc<dyn IdentityExtractor>>")
            .finish()
    }
}

impl Default for Extractors {
    fn default() -> Self {
        Self::reference(NARRATIVE_MARKER_OID)
    }
}

impl Extractors {
    /// The reference strategies, with the narrative marker at `marker_oid`.
    pub fn reference(marker_oid: &str) -> Self {
        Self {
            narrative: Arc::new(NarrativeExtractor::new(marker_oid)),
            sdr: Arc::new(SdrTranslator),
        }
    }

    /// Replaces the narrative strategy.
    #[must_use]
    pub fn with_narrative<E: IdentityExtractor + 'static>(mut self, extractor: E) -> Self {
        self.narrative = Arc::new(extractor);
        self
    }

    /// Replaces the SDR strategy.
    #[must_use]
    pub fn with_sdr<E: IdentityExtractor + 'static>(mut self, extractor: E) -> Self {
        self.sdr = Arc::new(extractor);
        self
    }

    /// The strategy for `scheme`.
    pub fn for_scheme(&self, scheme: Scheme) -> &dyn IdentityExtractor {
        match scheme {
            Scheme::Narrative => self.narrative.as_ref(),
            Scheme::Sdr => self.sdr.as_ref(),
        }
    }
}
