/// User Info Service Library
///
/// One hop of an mTLS trust chain. In `terminal` mode the service resolves
/// the caller from propagated metadata and answers `GetUserInfo`; in `relay`
/// mode it forwards the call, metadata included, to the next hop.
///
/// ## Modules
///
/// - `config`: Environment-driven settings
/// - `grpc`: gRPC server implementation and generated types
/// - `runtime`: Composition root (credentials, endpoint, server)
pub mod config;
pub mod grpc;
pub mod runtime;

// Re-export commonly used types
pub use config::{ServiceMode, Settings};
pub use grpc::{EndpointMode, UserInfoService};
pub use runtime::ServiceRuntime;
