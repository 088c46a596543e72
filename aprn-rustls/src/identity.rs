//! APRN identities and the validated set of expected peers.

use crate::error::{Error, Result};
use crate::prelude::error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Identity domains a peer may be expected to belong to.
///
/// Every entry of an expected peer list must use one of these domains; the
/// check runs once when the session configuration is built.
pub const SUPPORTED_DOMAINS: &[&str] = &["sdr", "aci-kube"];

/// A normalized `(domain, identifier)` pair naming a peer resource (APRN).
///
/// Equality is structural. The textual form is `domain:identifier`; the
/// domain never contains `:` while the identifier may.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity {
    domain: String,
    identifier: String,
}

impl Identity {
    /// Creates an identity from its two components.
    pub fn new(domain: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            identifier: identifier.into(),
        }
    }

    /// The identity domain, e.g. `sdr`.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The identifier within the domain.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain, self.identifier)
    }
}

impl FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason| Error::InvalidIdentity {
            input: s.to_string(),
            reason,
        };

        let (domain, identifier) = s.split_once(':').ok_or_else(|| invalid("missing ':'"))?;
        if domain.is_empty() {
            return Err(invalid("empty domain"));
        }
        if identifier.is_empty() {
            return Err(invalid("empty identifier"));
        }
        Ok(Self::new(domain, identifier))
    }
}

impl TryFrom<&str> for Identity {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        s.parse()
    }
}

/// Ordered, validated list of identities a peer must match one of.
///
/// Cheap to clone; shared read-only by every verification attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedIdentities(Arc<[Identity]>);

impl ExpectedIdentities {
    /// Validates that every identity belongs to one of `supported` domains.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownIdentityDomain`] naming the first offending entry.
    pub fn validate<I>(identities: I, supported: &[&str]) -> Result<Self>
    where
        I: IntoIterator<Item = Identity>,
    {
        let identities: Vec<Identity> = identities.into_iter().collect();
        for identity in &identities {
            if !supported.contains(&identity.domain()) {
                error!(
                    "Unable to set validation logic because of unknown identity domain for {identity}"
                );
                return Err(Error::UnknownIdentityDomain(identity.clone()));
            }
        }
        Ok(Self(identities.into()))
    }

    /// Returns the first expected identity (in configured order) that appears
    /// in `presented`.
    pub fn first_match(&self, presented: &[Identity]) -> Option<&Identity> {
        self.0.iter().find(|expected| presented.contains(expected))
    }

    /// Number of expected identities.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no identity is expected.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the expected identities in configured order.
    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.0.iter()
    }
}

impl fmt::Display for ExpectedIdentities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, identity) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{identity}")?;
        }
        f.write_str("]")
    }
}
