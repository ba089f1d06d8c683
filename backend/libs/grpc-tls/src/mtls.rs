//! Mutual TLS credential bundles for gRPC services
//!
//! ## Security Features
//! - **Mandatory client certificate verification** for the server role
//! - **Peer verification against a private CA** for the client role
//! - **Independent bundles** for services that are both server and client
//! - **Fail-fast loading**: unreadable files, malformed PEM or an empty CA
//!   bundle are startup errors
//!
//! ## Usage
//!
//! ### Relay hop (server to callers, client to upstream)
//! ```rust,no_run
//! use grpc_tls::mtls::{CredentialPaths, DualCredentials};
//!
//! # fn example() -> grpc_tls::TlsResult<()> {
//! let paths = CredentialPaths::from_dir("certs", "service_b");
//! let creds = DualCredentials::build(&paths, &paths, "service_a")?;
//!
//! let server_tls = creds.server.server_tls_config()?;
//! let client_tls = creds.client.client_tls_config()?;
//! # Ok(())
//! # }
//! ```

use crate::error::{TlsError, TlsResult};
use std::fs;
use std::path::{Path, PathBuf};
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};
use tracing::{debug, info};
use x509_parser::prelude::{FromDer, X509Certificate};

/// Days before expiry at which loading logs a rotation warning
const EXPIRY_WARNING_DAYS: u64 = 30;

/// Certificate file paths for one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPaths {
    /// Own certificate (PEM)
    pub cert_path: PathBuf,
    /// Own private key (PEM)
    pub key_path: PathBuf,
    /// Trusted roots used to verify the peer (PEM bundle)
    pub ca_path: PathBuf,
}

impl CredentialPaths {
    /// Canonical certificate directory layout:
    ///
    /// ```text
    /// <dir>/
    ///   ca.crt
    ///   <stem>.crt
    ///   <stem>.key
    /// ```
    pub fn from_dir(dir: impl AsRef<Path>, stem: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            cert_path: dir.join(format!("{stem}.crt")),
            key_path: dir.join(format!("{stem}.key")),
            ca_path: dir.join("ca.crt"),
        }
    }
}

/// Which side of the handshake a bundle is configured for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialRole {
    /// Accepts connections and requires a client certificate signed by the CA
    Server,
    /// Presents its certificate and verifies the server against the CA
    Client {
        /// Name the server certificate must be valid for
        domain_name: String,
    },
}

impl CredentialRole {
    fn label(&self) -> &'static str {
        match self {
            CredentialRole::Server => "server",
            CredentialRole::Client { .. } => "client",
        }
    }
}

/// Loaded, validated credential material for a single handshake direction
///
/// Immutable after [`CredentialBundle::build`]. The tonic TLS configs it
/// produces are cloned into the listener or channel that owns them.
#[derive(Debug, Clone)]
pub struct CredentialBundle {
    role: CredentialRole,
    cert_pem: String,
    key_pem: String,
    ca_pem: String,
    paths: CredentialPaths,
}

impl CredentialBundle {
    /// Load and validate credential material for `role`
    pub fn build(paths: &CredentialPaths, role: CredentialRole) -> TlsResult<Self> {
        if let CredentialRole::Client { domain_name } = &role {
            if domain_name.trim().is_empty() {
                return Err(TlsError::MissingDomainName);
            }
        }

        let cert_pem = read_pem(&paths.cert_path)?;
        let key_pem = read_pem(&paths.key_path)?;
        let ca_pem = read_pem(&paths.ca_path)?;

        let own_certs = count_certificates(&paths.cert_path, &cert_pem)?;
        if own_certs == 0 {
            return Err(TlsError::CertificateMissing {
                path: paths.cert_path.clone(),
            });
        }

        ensure_private_key(&paths.key_path, &key_pem)?;

        let trusted_roots = count_certificates(&paths.ca_path, &ca_pem)?;
        if trusted_roots == 0 {
            return Err(TlsError::EmptyCaBundle {
                path: paths.ca_path.clone(),
            });
        }

        crate::check_cert_expiration(&paths.cert_path, &cert_pem, EXPIRY_WARNING_DAYS)?;

        info!(
            role = role.label(),
            cert = ?paths.cert_path,
            ca = ?paths.ca_path,
            trusted_roots,
            "mTLS credential bundle loaded"
        );

        Ok(Self {
            role,
            cert_pem,
            key_pem,
            ca_pem,
            paths: paths.clone(),
        })
    }

    pub fn role(&self) -> &CredentialRole {
        &self.role
    }

    pub fn paths(&self) -> &CredentialPaths {
        &self.paths
    }

    /// Build tonic ServerTlsConfig with mandatory client cert verification
    pub fn server_tls_config(&self) -> TlsResult<ServerTlsConfig> {
        if self.role != CredentialRole::Server {
            return Err(TlsError::RoleMismatch {
                expected: "server",
                actual: self.role.label(),
            });
        }

        let identity = Identity::from_pem(&self.cert_pem, &self.key_pem);
        let client_ca = Certificate::from_pem(&self.ca_pem);

        // client_auth_optional stays false: peers without a trusted
        // certificate fail the handshake
        let tls_config = ServerTlsConfig::new()
            .identity(identity)
            .client_ca_root(client_ca)
            .client_auth_optional(false);

        debug!("Server TLS config built with mandatory client certificate verification");

        Ok(tls_config)
    }

    /// Build tonic ClientTlsConfig presenting this bundle's identity
    pub fn client_tls_config(&self) -> TlsResult<ClientTlsConfig> {
        let CredentialRole::Client { domain_name } = &self.role else {
            return Err(TlsError::RoleMismatch {
                expected: "client",
                actual: self.role.label(),
            });
        };

        let server_ca = Certificate::from_pem(&self.ca_pem);
        let identity = Identity::from_pem(&self.cert_pem, &self.key_pem);

        let tls_config = ClientTlsConfig::new()
            .ca_certificate(server_ca)
            .identity(identity)
            .domain_name(domain_name.as_str());

        debug!(domain = %domain_name, "Client TLS config built with mTLS authentication");

        Ok(tls_config)
    }
}

/// Server and client bundles for a service that is both
///
/// The two bundles may share key material but never share a handshake
/// context: each direction is loaded and verified on its own.
#[derive(Debug, Clone)]
pub struct DualCredentials {
    pub server: CredentialBundle,
    pub client: CredentialBundle,
}

impl DualCredentials {
    pub fn build(
        server_paths: &CredentialPaths,
        client_paths: &CredentialPaths,
        upstream_domain: impl Into<String>,
    ) -> TlsResult<Self> {
        let server = CredentialBundle::build(server_paths, CredentialRole::Server)?;
        let client = CredentialBundle::build(
            client_paths,
            CredentialRole::Client {
                domain_name: upstream_domain.into(),
            },
        )?;

        Ok(Self { server, client })
    }
}

fn read_pem(path: &Path) -> TlsResult<String> {
    fs::read_to_string(path).map_err(|e| TlsError::CertificateReadError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Count the certificates in a PEM bundle, rejecting any that are not X.509
fn count_certificates(path: &Path, pem: &str) -> TlsResult<usize> {
    let parse_error = |reason: String| TlsError::CertificateParseError {
        path: path.to_path_buf(),
        reason,
    };

    let certs = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| parse_error(e.to_string()))?;

    for (index, der) in certs.iter().enumerate() {
        X509Certificate::from_der(der.as_ref())
            .map_err(|e| parse_error(format!("certificate #{}: {}", index + 1, e)))?;
    }

    Ok(certs.len())
}

fn ensure_private_key(path: &Path, pem: &str) -> TlsResult<()> {
    match rustls_pemfile::private_key(&mut pem.as_bytes()) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(TlsError::PrivateKeyMissing {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(TlsError::CertificateParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}
