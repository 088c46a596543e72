//! Trust anchors assembled from the root certificates of every identity scheme.

use crate::error::{Error, Result};
use crate::prelude::{debug, error};
use crate::scheme::Scheme;
use rustls::pki_types::CertificateDer;
use rustls::{DistinguishedName, RootCertStore};
use std::sync::Arc;

/// Immutable union of the root certificates of all supported schemes.
///
/// Built once per session configuration and shared by every verification
/// attempt. The concatenated DER list is kept alongside the parsed
/// [`RootCertStore`] so engines can report the anchoring root of a chain.
#[derive(Clone, Debug)]
pub struct TrustAnchorSet {
    certs: Arc<[CertificateDer<'static>]>,
    store: Option<Arc<RootCertStore>>,
    subjects: Arc<[DistinguishedName]>,
}

impl TrustAnchorSet {
    /// Concatenates per-scheme root lists into one anchor set.
    ///
    /// Certificates that rustls cannot use as anchors are logged and
    /// skipped. If none is usable the set has no root store and every
    /// attempt to install it fails.
    pub fn new<I>(per_scheme: I) -> Self
    where
        I: IntoIterator<Item = (Scheme, Vec<CertificateDer<'static>>)>,
    {
        let mut certs = Vec::new();
        for (scheme, roots) in per_scheme {
            debug!("adding {} root certificate(s) for {scheme} identities", roots.len());
            certs.extend(roots);
        }

        let mut store = RootCertStore::empty();
        let (added, ignored) = store.add_parsable_certificates(certs.iter().cloned());
        debug!("loaded root cert(s): added={added}, ignored={ignored}");

        let (store, subjects) = if store.is_empty() {
            error!("no root certificates were accepted as trust anchors");
            (None, Vec::new())
        } else {
            let subjects = store.subjects();
            (Some(Arc::new(store)), subjects)
        };

        Self {
            certs: certs.into(),
            store,
            subjects: subjects.into(),
        }
    }

    /// An anchor set with no roots. Installing it always fails.
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// All root certificates, in scheme order.
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certs
    }

    /// The parsed root store, or `None` if no root was usable.
    pub fn root_store(&self) -> Option<Arc<RootCertStore>> {
        self.store.clone()
    }

    /// Subject names of the usable roots, sent as client-auth root hints.
    pub fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &self.subjects
    }

    /// Whether no root was usable.
    pub fn is_empty(&self) -> bool {
        self.store.is_none()
    }
}

/// Decodes DER certificates supplied as raw bytes.
///
/// Every entry must parse as a single X.509 certificate with no trailing
/// data.
///
/// # Errors
///
/// Returns [`Error::CertParse`] naming the index of the first entry that
/// does not decode.
pub fn certs_from_der<I, B>(ders: I) -> Result<Vec<CertificateDer<'static>>>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    ders.into_iter()
        .enumerate()
        .map(|(index, der)| {
            let der = der.as_ref();
            match x509_parser::parse_x509_certificate(der) {
                Ok((rest, _)) if rest.is_empty() => Ok(CertificateDer::from(der.to_vec())),
                Ok(_) => Err(Error::CertParse {
                    index,
                    reason: "trailing data after certificate".into(),
                }),
                Err(e) => Err(Error::CertParse {
                    index,
                    reason: e.to_string(),
                }),
            }
        })
        .collect()
}
