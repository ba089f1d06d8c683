//! Certificate Generation for Development and Testing
//!
//! Generates a private CA plus server and client certificates for mTLS in
//! development environments and tests.
//! **WARNING**: NEVER use in production - use proper CA-signed certificates.

use anyhow::{Context, Result};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    SanType,
};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use tracing::info;

const ORGANIZATION: &str = "Nova Development";

/// Bundle of certificates for development
#[derive(Clone)]
pub struct CertificateBundle {
    /// CA certificate (PEM)
    pub ca_cert: String,
    /// CA private key (PEM)
    pub ca_key: String,
    /// Server certificate signed by CA (PEM)
    pub server_cert: String,
    /// Server private key (PEM)
    pub server_key: String,
    /// Client certificate for mTLS (PEM)
    pub client_cert: String,
    /// Client private key (PEM)
    pub client_key: String,
}

/// Generate development certificates (CA, server, client)
///
/// The server certificate is valid for `localhost` and `127.0.0.1`.
pub fn generate_dev_certificates() -> Result<CertificateBundle> {
    generate_dev_certificates_for(&["localhost"])
}

/// Generate development certificates with additional server DNS names
///
/// Every call creates a fresh, unrelated CA, so two bundles never trust each
/// other's certificates.
pub fn generate_dev_certificates_for(server_names: &[&str]) -> Result<CertificateBundle> {
    let mut ca_params = CertificateParams::default();
    ca_params.distinguished_name = distinguished_name("Nova Development CA");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

    let ca_keypair = KeyPair::generate()?;
    let ca_cert = ca_params
        .self_signed(&ca_keypair)
        .context("Failed to generate CA certificate")?;

    let mut server_params = CertificateParams::default();
    let common_name = server_names.first().copied().unwrap_or("localhost");
    server_params.distinguished_name = distinguished_name(common_name);
    for name in server_names {
        server_params.subject_alt_names.push(SanType::DnsName(
            (*name)
                .try_into()
                .with_context(|| format!("Failed to create SAN for {}", name))?,
        ));
    }
    server_params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));

    let (server_cert, server_key) = issue(server_params, &ca_cert, &ca_keypair)
        .context("Failed to sign server certificate")?;

    let mut client_params = CertificateParams::default();
    client_params.distinguished_name = distinguished_name("client");

    let (client_cert, client_key) = issue(client_params, &ca_cert, &ca_keypair)
        .context("Failed to sign client certificate")?;

    info!(
        server_names = ?server_names,
        "Generated development certificates (CA, server, client)"
    );

    Ok(CertificateBundle {
        ca_cert: ca_cert.pem(),
        ca_key: ca_keypair.serialize_pem(),
        server_cert,
        server_key,
        client_cert,
        client_key,
    })
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, ORGANIZATION);
    dn
}

/// Sign a leaf certificate with the CA, returning (cert PEM, key PEM)
fn issue(
    params: CertificateParams,
    ca_cert: &Certificate,
    ca_key: &KeyPair,
) -> Result<(String, String)> {
    let keypair = KeyPair::generate()?;
    let cert = params.signed_by(&keypair, ca_cert, ca_key)?;
    Ok((cert.pem(), keypair.serialize_pem()))
}

/// Write certificate bundle to files
///
/// Creates directory structure:
/// ```text
/// certs/
///   ca.crt        (CA certificate)
///   ca.key        (CA private key)
///   server.crt    (Server certificate)
///   server.key    (Server private key)
///   client.crt    (Client certificate)
///   client.key    (Client private key)
/// ```
pub fn write_cert_bundle(bundle: &CertificateBundle, output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create directory: {:?}", output_dir))?;

    let files = [
        ("ca.crt", &bundle.ca_cert),
        ("ca.key", &bundle.ca_key),
        ("server.crt", &bundle.server_cert),
        ("server.key", &bundle.server_key),
        ("client.crt", &bundle.client_cert),
        ("client.key", &bundle.client_key),
    ];

    for (name, contents) in files {
        fs::write(output_dir.join(name), contents)
            .with_context(|| format!("Failed to write {}", name))?;
    }

    info!(output_dir = ?output_dir, "Certificate bundle written to disk");
    Ok(())
}
