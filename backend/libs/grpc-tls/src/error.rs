//! Error types for credential loading
//!
//! Every variant is a startup/configuration failure. Callers are expected to
//! abort instead of retrying: a listener must never come up with partial
//! trust material.

use std::path::PathBuf;
use thiserror::Error;

pub type TlsResult<T> = std::result::Result<T, TlsError>;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path:?}: {source}")]
    CertificateReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {reason}")]
    CertificateParseError { path: PathBuf, reason: String },

    #[error("no certificate found in {path:?}")]
    CertificateMissing { path: PathBuf },

    #[error("no private key found in {path:?}")]
    PrivateKeyMissing { path: PathBuf },

    #[error("CA bundle {path:?} contains no trusted roots")]
    EmptyCaBundle { path: PathBuf },

    #[error("certificate {path:?} expired {days_ago} days ago")]
    CertificateExpired { path: PathBuf, days_ago: i64 },

    #[error("credential bundle built for {actual} role cannot be used as {expected}")]
    RoleMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("client role requires a server domain name for certificate verification")]
    MissingDomainName,
}
