use crate::identity::Identity;

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration-time errors returned by `aprn-rustls`.
///
/// Per-connection verification failures never surface as an `Error`; they are
/// reported as a [`FailureKind`](crate::FailureKind) and the handshake fails
/// with a generic alert.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An expected peer identity names a domain outside [`SUPPORTED_DOMAINS`](crate::SUPPORTED_DOMAINS).
    #[error("unknown identity domain for expected peer {0}")]
    UnknownIdentityDomain(Identity),

    /// An identity could not be parsed from its textual form.
    #[error("invalid identity {input:?}: {reason}")]
    InvalidIdentity {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A DER certificate in supplied root material could not be decoded.
    #[error("failed to parse cert (idx={index}): {reason}")]
    CertParse {
        /// Position of the offending certificate in the supplied list.
        index: usize,
        /// Parser diagnostic.
        reason: String,
    },

    /// The dedicated verification executor could not be started.
    #[error("failed to start verification executor: {0}")]
    Executor(#[from] std::io::Error),

    /// A rustls error occurred.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}

impl Error {
    /// A stable description that never includes identities or certificate
    /// contents, suitable for reporting outside the process.
    pub const fn public_description(&self) -> &'static str {
        match self {
            Self::UnknownIdentityDomain(_) => "TLSConfigurationError.unknownIdentityDomain",
            Self::InvalidIdentity { .. } => "TLSConfigurationError.invalidIdentity",
            Self::CertParse { .. } => "TLSConfigurationError.certParse",
            Self::Executor(_) => "TLSConfigurationError.executor",
            Self::Rustls(_) => "TLSConfigurationError.rustls",
        }
    }
}
