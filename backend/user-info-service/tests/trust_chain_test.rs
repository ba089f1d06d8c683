//! End-to-end trust chain tests
//!
//! Every hop is a real tonic server on an ephemeral port, secured with
//! certificates from a throwaway CA:
//!
//! edge client -> relay (service B) -> terminal (service A)

use grpc_tls::{
    cert_generation::{generate_dev_certificates, write_cert_bundle},
    CredentialBundle, CredentialPaths, CredentialRole,
};
use identity_propagation::IdentityResolver;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};
use tonic::{Code, Request, Response, Status};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use user_info_service::grpc::user::v1::user_service_client::UserServiceClient;
use user_info_service::grpc::user::v1::user_service_server::{UserService, UserServiceServer};
use user_info_service::grpc::user::v1::{UserRequest, UserResponse};
use user_info_service::{ServiceRuntime, Settings, UserInfoService};

fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// One CA for the whole chain plus a client identity from an unrelated CA
fn setup_certs() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let trusted = generate_dev_certificates().unwrap();
    let rogue = generate_dev_certificates().unwrap();

    write_cert_bundle(&trusted, temp_dir.path()).unwrap();
    fs::write(temp_dir.path().join("rogue.crt"), &rogue.client_cert).unwrap();
    fs::write(temp_dir.path().join("rogue.key"), &rogue.client_key).unwrap();

    temp_dir
}

fn settings(cert_dir: &Path, vars: &[(&str, String)]) -> Settings {
    let mut env: HashMap<String, String> = HashMap::new();
    env.insert("GRPC_HOST".into(), "127.0.0.1".into());
    env.insert("GRPC_PORT".into(), "0".into());
    env.insert("GRPC_CERT_DIR".into(), cert_dir.display().to_string());
    env.insert(
        "GRPC_CLIENT_CERT_PATH".into(),
        cert_dir.join("client.crt").display().to_string(),
    );
    env.insert(
        "GRPC_CLIENT_KEY_PATH".into(),
        cert_dir.join("client.key").display().to_string(),
    );
    for (key, value) in vars {
        env.insert(key.to_string(), value.clone());
    }

    Settings::from_lookup(&|key| env.get(key).cloned()).unwrap()
}

async fn spawn_runtime(settings: Settings) -> (SocketAddr, oneshot::Sender<()>) {
    let runtime = ServiceRuntime::build(&settings).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        runtime
            .serve_with_listener(listener, async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
    });

    (addr, shutdown_tx)
}

/// Serve an arbitrary `UserService` behind the chain's server credentials
async fn spawn_service<S: UserService>(
    cert_dir: &Path,
    service: S,
) -> (SocketAddr, oneshot::Sender<()>) {
    let bundle = CredentialBundle::build(
        &CredentialPaths::from_dir(cert_dir, "server"),
        CredentialRole::Server,
    )
    .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        Server::builder()
            .tls_config(bundle.server_tls_config().unwrap())
            .unwrap()
            .add_service(UserServiceServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
    });

    (addr, shutdown_tx)
}

async fn edge_channel(cert_dir: &Path, stem: &str, addr: SocketAddr) -> Result<Channel, String> {
    let bundle = CredentialBundle::build(
        &CredentialPaths::from_dir(cert_dir, stem),
        CredentialRole::Client {
            domain_name: "localhost".to_string(),
        },
    )
    .map_err(|e| e.to_string())?;

    Channel::from_shared(format!("https://{}", addr))
        .map_err(|e| e.to_string())?
        .tls_config(bundle.client_tls_config().map_err(|e| e.to_string())?)
        .map_err(|e| e.to_string())?
        .connect()
        .await
        .map_err(|e| e.to_string())
}

async fn get_user_info(
    channel: Channel,
    metadata: &[(&'static str, &str)],
) -> Result<UserResponse, Status> {
    let mut request = Request::new(UserRequest {
        id: "req-1".to_string(),
    });
    for (name, value) in metadata {
        request
            .metadata_mut()
            .insert(*name, value.parse().unwrap());
    }

    UserServiceClient::new(channel)
        .get_user_info(request)
        .await
        .map(Response::into_inner)
}

fn relay_settings(cert_dir: &Path, upstream: SocketAddr) -> Settings {
    settings(
        cert_dir,
        &[
            ("SERVICE_NAME", "service-b".to_string()),
            ("SERVICE_MODE", "relay".to_string()),
            ("UPSTREAM_ADDR", format!("https://{}", upstream)),
            ("UPSTREAM_DOMAIN", "localhost".to_string()),
        ],
    )
}

#[tokio::test]
async fn test_identity_through_relay_matches_direct_call() {
    install_crypto_provider();
    let certs = setup_certs();

    let (terminal_addr, terminal_shutdown) = spawn_runtime(settings(
        certs.path(),
        &[("SERVICE_NAME", "service-a".to_string())],
    ))
    .await;
    let (relay_addr, relay_shutdown) =
        spawn_runtime(relay_settings(certs.path(), terminal_addr)).await;

    let identity = [("x-user-id", "alice"), ("x-tenant-id", "tenantA")];

    let direct = get_user_info(
        edge_channel(certs.path(), "client", terminal_addr).await.unwrap(),
        &identity,
    )
    .await
    .unwrap();

    let relayed = get_user_info(
        edge_channel(certs.path(), "client", relay_addr).await.unwrap(),
        &identity,
    )
    .await
    .unwrap();

    assert_eq!(relayed.message, "Hello user alice!");
    assert_eq!(relayed.tenant_id, "tenantA");
    assert_eq!(relayed, direct);

    let _ = relay_shutdown.send(());
    let _ = terminal_shutdown.send(());
}

#[tokio::test]
async fn test_bearer_subject_through_relay() {
    install_crypto_provider();
    let certs = setup_certs();

    let (terminal_addr, terminal_shutdown) = spawn_runtime(settings(certs.path(), &[])).await;
    let (relay_addr, relay_shutdown) =
        spawn_runtime(relay_settings(certs.path(), terminal_addr)).await;

    let token = encode(
        &Header::default(),
        &json!({ "sub": "user-42" }),
        &EncodingKey::from_secret(b"known-only-to-the-gateway"),
    )
    .unwrap();
    let authorization = format!("Bearer {}", token);

    let response = get_user_info(
        edge_channel(certs.path(), "client", relay_addr).await.unwrap(),
        &[("authorization", authorization.as_str())],
    )
    .await
    .unwrap();

    assert_eq!(response.message, "Hello user user-42!");
    assert_eq!(response.tenant_id, "default-tenant");

    let _ = relay_shutdown.send(());
    let _ = terminal_shutdown.send(());
}

/// Terminal endpoint that counts how often its handler ran
struct CountingService {
    inner: UserInfoService,
    calls: Arc<AtomicUsize>,
}

#[tonic::async_trait]
impl UserService for CountingService {
    async fn get_user_info(
        &self,
        request: Request<UserRequest>,
    ) -> Result<Response<UserResponse>, Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_user_info(request).await
    }
}

#[tokio::test]
async fn test_untrusted_client_never_reaches_handler() {
    install_crypto_provider();
    let certs = setup_certs();
    let calls = Arc::new(AtomicUsize::new(0));

    let (addr, shutdown) = spawn_service(
        certs.path(),
        CountingService {
            inner: UserInfoService::terminal("service-a", IdentityResolver::default()),
            calls: calls.clone(),
        },
    )
    .await;

    let outcome = match edge_channel(certs.path(), "rogue", addr).await {
        Ok(channel) => get_user_info(channel, &[("x-user-id", "mallory")])
            .await
            .map(|_| ())
            .map_err(|status| status.to_string()),
        Err(e) => Err(e),
    };

    assert!(outcome.is_err(), "client signed by a foreign CA was served");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // A trusted client on the same listener is served
    let response = get_user_info(
        edge_channel(certs.path(), "client", addr).await.unwrap(),
        &[("x-user-id", "alice")],
    )
    .await
    .unwrap();
    assert_eq!(response.message, "Hello user alice!");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let _ = shutdown.send(());
}

#[tokio::test]
async fn test_upstream_status_reaches_edge_unchanged() {
    struct Denying;

    #[tonic::async_trait]
    impl UserService for Denying {
        async fn get_user_info(
            &self,
            _request: Request<UserRequest>,
        ) -> Result<Response<UserResponse>, Status> {
            Err(Status::permission_denied("tenant suspended"))
        }
    }

    install_crypto_provider();
    let certs = setup_certs();

    let (upstream_addr, upstream_shutdown) = spawn_service(certs.path(), Denying).await;
    let (relay_addr, relay_shutdown) =
        spawn_runtime(relay_settings(certs.path(), upstream_addr)).await;

    let status = get_user_info(
        edge_channel(certs.path(), "client", relay_addr).await.unwrap(),
        &[("x-user-id", "alice")],
    )
    .await
    .unwrap_err();

    assert_eq!(status.code(), Code::PermissionDenied);
    assert_eq!(status.message(), "tenant suspended");

    let _ = relay_shutdown.send(());
    let _ = upstream_shutdown.send(());
}

/// Counts handler futures dropped before completing
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Upstream that records the deadline it was handed and never answers in time
struct SlowService {
    timeout_header: Arc<Mutex<Option<String>>>,
    dropped: Arc<AtomicUsize>,
}

#[tonic::async_trait]
impl UserService for SlowService {
    async fn get_user_info(
        &self,
        request: Request<UserRequest>,
    ) -> Result<Response<UserResponse>, Status> {
        *self.timeout_header.lock().unwrap() = request
            .metadata()
            .get("grpc-timeout")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let _guard = DropCounter(self.dropped.clone());
        tokio::time::sleep(Duration::from_secs(10)).await;

        Ok(Response::new(UserResponse {
            message: "too late".to_string(),
            tenant_id: String::new(),
        }))
    }
}

#[tokio::test]
async fn test_edge_deadline_bounds_and_cancels_upstream_call() {
    install_crypto_provider();
    let certs = setup_certs();
    let timeout_header = Arc::new(Mutex::new(None));
    let dropped = Arc::new(AtomicUsize::new(0));

    let (upstream_addr, upstream_shutdown) = spawn_service(
        certs.path(),
        SlowService {
            timeout_header: timeout_header.clone(),
            dropped: dropped.clone(),
        },
    )
    .await;
    let (relay_addr, relay_shutdown) =
        spawn_runtime(relay_settings(certs.path(), upstream_addr)).await;

    let channel = edge_channel(certs.path(), "client", relay_addr).await.unwrap();
    let mut request = Request::new(UserRequest {
        id: "req-slow".to_string(),
    });
    request.set_timeout(Duration::from_millis(300));
    request
        .metadata_mut()
        .insert("x-user-id", "alice".parse().unwrap());

    let started = Instant::now();
    let status = UserServiceClient::new(channel)
        .get_user_info(request)
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(
        matches!(status.code(), Code::Cancelled | Code::DeadlineExceeded),
        "unexpected status: {:?}",
        status
    );

    // Abandoning the edge call tears down the upstream handler
    let give_up = Instant::now() + Duration::from_secs(3);
    while dropped.load(Ordering::SeqCst) == 0 && Instant::now() < give_up {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(dropped.load(Ordering::SeqCst), 1);

    // The deadline travelled with the rest of the metadata
    assert!(timeout_header.lock().unwrap().is_some());

    let _ = relay_shutdown.send(());
    let _ = upstream_shutdown.send(());
}

#[tokio::test]
async fn test_unreachable_upstream_is_reported_not_retried() {
    install_crypto_provider();
    let certs = setup_certs();

    // Bind then drop to get a port nothing listens on
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed_addr = closed.local_addr().unwrap();
    drop(closed);

    let (relay_addr, relay_shutdown) =
        spawn_runtime(relay_settings(certs.path(), closed_addr)).await;

    let status = get_user_info(
        edge_channel(certs.path(), "client", relay_addr).await.unwrap(),
        &[("x-user-id", "alice")],
    )
    .await
    .unwrap_err();

    assert!(
        matches!(status.code(), Code::Unavailable | Code::Unknown),
        "unexpected status: {:?}",
        status
    );

    let _ = relay_shutdown.send(());
}

#[tokio::test]
async fn test_health_service_reports_serving() {
    install_crypto_provider();
    let certs = setup_certs();
    let (addr, shutdown) = spawn_runtime(settings(certs.path(), &[])).await;

    let response = HealthClient::new(edge_channel(certs.path(), "client", addr).await.unwrap())
        .check(HealthCheckRequest {
            service: "user.v1.UserService".to_string(),
        })
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.status(), ServingStatus::Serving);

    let _ = shutdown.send(());
}
