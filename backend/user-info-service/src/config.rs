//! Configuration management for User Info Service
//!
//! Loads settings from:
//! 1. Environment variables
//! 2. .env file (local development)
//!
//! One binary serves every hop of the chain; `SERVICE_MODE` selects whether
//! this process resolves identity itself (`terminal`) or forwards calls to
//! `UPSTREAM_ADDR` (`relay`).
//!
//! # Example
//!
//! ```no_run
//! use user_info_service::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("Listening on {}", settings.server.addr()?);
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, bail, Context, Result};
use grpc_tls::CredentialPaths;
use identity_propagation::{headers, ResolverConfig};
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tonic::transport::Uri;
use tracing::info;

/// Source of configuration values, keyed by variable name
type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub service_name: String,
    pub mode: ServiceMode,
    pub server: ServerSettings,
    pub tls: TlsSettings,
    /// Present iff `mode` is [`ServiceMode::Relay`]
    pub upstream: Option<UpstreamSettings>,
    pub identity: IdentitySettings,
    pub reflection_enabled: bool,
}

impl Settings {
    /// Load settings from the process environment
    pub fn load() -> Result<Self> {
        // Load .env file in development
        if cfg!(debug_assertions) && dotenvy::dotenv().is_ok() {
            info!("Loaded .env file for development");
        }

        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let mode = match non_empty(lookup, "SERVICE_MODE") {
            Some(value) => value.parse()?,
            None => ServiceMode::Terminal,
        };

        let upstream = match mode {
            ServiceMode::Terminal => None,
            ServiceMode::Relay => Some(UpstreamSettings::from_lookup(lookup)?),
        };

        Ok(Self {
            service_name: non_empty(lookup, "SERVICE_NAME")
                .unwrap_or_else(|| "user-info-service".to_string()),
            mode,
            server: ServerSettings::from_lookup(lookup)?,
            tls: TlsSettings::from_lookup(lookup),
            upstream,
            identity: IdentitySettings::from_lookup(lookup)?,
            reflection_enabled: parse_bool(lookup, "GRPC_REFLECTION_ENABLED", true)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMode {
    /// Resolve caller identity and answer
    Terminal,
    /// Forward the call and its metadata to the upstream peer
    Relay,
}

impl FromStr for ServiceMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "terminal" => Ok(ServiceMode::Terminal),
            "relay" => Ok(ServiceMode::Relay),
            other => Err(anyhow!(
                "Invalid SERVICE_MODE '{}' (expected 'terminal' or 'relay')",
                other
            )),
        }
    }
}

impl fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceMode::Terminal => f.write_str("terminal"),
            ServiceMode::Relay => f.write_str("relay"),
        }
    }
}

/// gRPC listener settings
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        Ok(Self {
            host: non_empty(lookup, "GRPC_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: non_empty(lookup, "GRPC_PORT")
                .unwrap_or_else(|| "50051".to_string())
                .parse()
                .context("Invalid GRPC_PORT")?,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("Invalid server address")
    }
}

/// Certificate material for both handshake directions
///
/// The client paths default to the server material, matching a deployment
/// where one service certificate is used in both directions.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub cert_dir: PathBuf,
    pub server: CredentialPaths,
    pub client: CredentialPaths,
}

impl TlsSettings {
    fn from_lookup(lookup: Lookup<'_>) -> Self {
        let cert_dir = PathBuf::from(
            non_empty(lookup, "GRPC_CERT_DIR").unwrap_or_else(|| "certs".to_string()),
        );
        let stem = non_empty(lookup, "GRPC_CERT_NAME").unwrap_or_else(|| "server".to_string());
        let defaults = CredentialPaths::from_dir(&cert_dir, &stem);

        let path_or = |key: &str, default: &PathBuf| {
            non_empty(lookup, key)
                .map(PathBuf::from)
                .unwrap_or_else(|| default.clone())
        };

        let server = CredentialPaths {
            cert_path: path_or("GRPC_SERVER_CERT_PATH", &defaults.cert_path),
            key_path: path_or("GRPC_SERVER_KEY_PATH", &defaults.key_path),
            ca_path: path_or("GRPC_CA_CERT_PATH", &defaults.ca_path),
        };

        let client = CredentialPaths {
            cert_path: path_or("GRPC_CLIENT_CERT_PATH", &server.cert_path),
            key_path: path_or("GRPC_CLIENT_KEY_PATH", &server.key_path),
            ca_path: path_or("GRPC_CLIENT_CA_CERT_PATH", &server.ca_path),
        };

        Self {
            cert_dir,
            server,
            client,
        }
    }
}

/// Next hop for relay mode
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Always an `https://` URI
    pub address: String,
    /// Name the upstream certificate must be valid for
    pub domain: String,
}

impl UpstreamSettings {
    fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let raw = non_empty(lookup, "UPSTREAM_ADDR")
            .context("UPSTREAM_ADDR must be set when SERVICE_MODE=relay")?;

        // Bare host:port means TLS; an explicit plaintext scheme is refused
        let address = if raw.contains("://") {
            raw
        } else {
            format!("https://{}", raw)
        };

        let uri: Uri = address
            .parse()
            .with_context(|| format!("Invalid UPSTREAM_ADDR '{}'", address))?;

        if uri.scheme_str() != Some("https") {
            bail!(
                "UPSTREAM_ADDR '{}' must use https: relay hops only speak mTLS",
                address
            );
        }

        let domain = match non_empty(lookup, "UPSTREAM_DOMAIN") {
            Some(domain) => domain,
            None => uri
                .host()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("UPSTREAM_ADDR '{}' has no host", address))?,
        };

        Ok(Self { address, domain })
    }
}

/// Identity header policy for the terminal hop
#[derive(Debug, Clone)]
pub struct IdentitySettings {
    pub caller_header: String,
    pub tenant_header: String,
    pub allow_unverified_bearer: bool,
}

impl IdentitySettings {
    fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        Ok(Self {
            caller_header: non_empty(lookup, "IDENTITY_CALLER_HEADER")
                .unwrap_or_else(|| headers::CALLER_ID.to_string())
                .to_ascii_lowercase(),
            tenant_header: non_empty(lookup, "IDENTITY_TENANT_HEADER")
                .unwrap_or_else(|| headers::TENANT_ID.to_string())
                .to_ascii_lowercase(),
            allow_unverified_bearer: parse_bool(lookup, "IDENTITY_ALLOW_UNVERIFIED_BEARER", true)?,
        })
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            caller_header: self.caller_header.clone(),
            tenant_header: self.tenant_header.clone(),
            allow_unverified_bearer: self.allow_unverified_bearer,
        }
    }
}

fn non_empty(lookup: Lookup<'_>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(lookup: Lookup<'_>, key: &str, default: bool) -> Result<bool> {
    match non_empty(lookup, key) {
        Some(value) => value
            .parse::<bool>()
            .with_context(|| format!("Invalid {} '{}'", key, value)),
        None => Ok(default),
    }
}
