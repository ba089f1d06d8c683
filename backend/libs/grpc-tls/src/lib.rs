//! gRPC TLS Configuration Library with mTLS Support
//!
//! **Security Features**:
//! - Server credentials that require and verify client certificates
//! - Client credentials that present an identity and verify the server
//! - Independent server/client bundles for relay hops
//! - Fail-fast loading of certificate, key and CA material
//! - Development CA/server/client certificate generation
//!
//! Credential problems are configuration errors. Nothing here retries; the
//! process is expected to exit when a bundle cannot be built.

use chrono::Utc;
use std::path::Path;
use tracing::{info, warn};
use x509_parser::prelude::*;

pub mod cert_generation;
pub mod error;
pub mod mtls;

pub use cert_generation::{generate_dev_certificates, write_cert_bundle, CertificateBundle};
pub use error::{TlsError, TlsResult};
pub use mtls::{CredentialBundle, CredentialPaths, CredentialRole, DualCredentials};

/// Validate certificate expiration
///
/// Returns the number of whole days until the certificate expires. Logs a
/// rotation warning when fewer than `warn_days_before` days remain.
pub fn validate_cert_expiration(cert_pem: &str, warn_days_before: u64) -> TlsResult<i64> {
    check_cert_expiration(Path::new("memory"), cert_pem, warn_days_before)
}

pub(crate) fn check_cert_expiration(
    path: &Path,
    cert_pem: &str,
    warn_days_before: u64,
) -> TlsResult<i64> {
    let parse_error = |reason: String| TlsError::CertificateParseError {
        path: path.to_path_buf(),
        reason,
    };

    let pem = ::pem::parse(cert_pem).map_err(|e| parse_error(format!("PEM: {}", e)))?;

    let (_, cert) = X509Certificate::from_der(pem.contents())
        .map_err(|e| parse_error(format!("X.509 parse failed: {}", e)))?;

    let expiry_timestamp = cert.validity().not_after.timestamp();
    let days_until_expiry = (expiry_timestamp - Utc::now().timestamp()) / 86400;

    if expiry_timestamp < Utc::now().timestamp() {
        return Err(TlsError::CertificateExpired {
            path: path.to_path_buf(),
            days_ago: -days_until_expiry,
        });
    }

    if days_until_expiry < warn_days_before as i64 {
        warn!(
            cert = ?path,
            days_remaining = days_until_expiry,
            "Certificate expiring soon - rotation recommended"
        );
    } else {
        info!(
            cert = ?path,
            days_until_expiry = days_until_expiry,
            "Certificate validity check passed"
        );
    }

    Ok(days_until_expiry)
}
