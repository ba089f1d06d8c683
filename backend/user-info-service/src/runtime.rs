//! Composition root
//!
//! Turns [`Settings`] into a ready-to-serve gRPC server: credential bundles,
//! the upstream channel for relay mode, the `UserService` endpoint and the
//! health/reflection services. Every failure here is a startup failure.

use crate::config::{ServiceMode, Settings};
use crate::grpc::user::v1::user_service_client::UserServiceClient;
use crate::grpc::user::v1::user_service_server::UserServiceServer;
use crate::grpc::{UserInfoService, FILE_DESCRIPTOR_SET};
use anyhow::{Context, Result};
use grpc_tls::{CredentialBundle, CredentialRole, DualCredentials};
use identity_propagation::IdentityResolver;
use std::future::Future;
use std::path::Path;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Router;
use tonic::transport::{Channel, Server, ServerTlsConfig};
use tracing::{info, warn};

pub struct ServiceRuntime {
    settings: Settings,
    server_tls: ServerTlsConfig,
    service: UserInfoService,
}

impl ServiceRuntime {
    pub fn build(settings: &Settings) -> Result<Self> {
        let (server_tls, service) = match settings.mode {
            ServiceMode::Terminal => {
                let bundle = CredentialBundle::build(&settings.tls.server, CredentialRole::Server)
                    .context("Failed to load server credentials")?;

                let resolver = IdentityResolver::new(settings.identity.resolver_config());
                let service = UserInfoService::terminal(settings.service_name.clone(), resolver);

                (bundle.server_tls_config()?, service)
            }
            ServiceMode::Relay => {
                let upstream = settings
                    .upstream
                    .as_ref()
                    .context("Relay mode requires upstream settings")?;

                let credentials = DualCredentials::build(
                    &settings.tls.server,
                    &settings.tls.client,
                    upstream.domain.clone(),
                )
                .context("Failed to load relay credentials")?;

                // Lazy: a relay may start before its upstream is reachable
                let channel = Channel::from_shared(upstream.address.clone())
                    .with_context(|| format!("Invalid upstream address {}", upstream.address))?
                    .tls_config(credentials.client.client_tls_config()?)
                    .context("Failed to configure upstream TLS")?
                    .connect_lazy();

                info!(
                    upstream = %upstream.address,
                    domain = %upstream.domain,
                    "Upstream channel configured"
                );

                let service = UserInfoService::relay(
                    settings.service_name.clone(),
                    UserServiceClient::new(channel),
                );

                (credentials.server.server_tls_config()?, service)
            }
        };

        Ok(Self {
            settings: settings.clone(),
            server_tls,
            service,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Bind the configured address and serve until `shutdown` resolves
    ///
    /// TLS is applied to the server before the port is taken, so bad
    /// credentials never leave a bound listener behind.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.settings.server.addr()?;
        let (settings, router) = self.into_router().await?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        run_router(&settings, router, listener, shutdown).await
    }

    /// Serve on an already-bound listener
    pub async fn serve_with_listener<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (settings, router) = self.into_router().await?;
        run_router(&settings, router, listener, shutdown).await
    }

    /// TLS-configured server with health, `UserService` and optional reflection
    async fn into_router(self) -> Result<(Settings, Router)> {
        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<UserServiceServer<UserInfoService>>()
            .await;

        let reflection_service = if self.settings.reflection_enabled {
            Some(
                tonic_reflection::server::Builder::configure()
                    .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
                    .build_v1()
                    .context("Failed to build reflection service")?,
            )
        } else {
            None
        };

        let router = Server::builder()
            .tls_config(self.server_tls)
            .context("Failed to configure gRPC TLS")?
            .add_service(health_service)
            .add_service(UserServiceServer::new(self.service))
            .add_optional_service(reflection_service);

        Ok((self.settings, router))
    }
}

async fn run_router<F>(
    settings: &Settings,
    router: Router,
    listener: TcpListener,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let local_addr = listener.local_addr().context("Listener has no address")?;

    info!(
        service = %settings.service_name,
        mode = %settings.mode,
        addr = %local_addr,
        reflection = settings.reflection_enabled,
        "Starting gRPC server with mTLS"
    );

    router
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
        .context("gRPC server error")?;

    info!(service = %settings.service_name, "gRPC server stopped");

    Ok(())
}

/// Log the contents of the certificate directory
///
/// Mounted secrets are the usual cause of startup failures; seeing what the
/// process can actually read saves a round trip.
pub fn log_certificate_directory(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot list certificate directory");
            return;
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    info!(dir = %dir.display(), files = ?names, "Certificate directory contents");
}
