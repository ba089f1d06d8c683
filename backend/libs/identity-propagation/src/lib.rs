//! Caller Identity Propagation for gRPC Microservices
//!
//! Trust in a caller's identity is established once, at the edge gateway.
//! Internal hops are secured by mTLS (see `grpc-tls`) and must carry the
//! edge's identity context forward untouched. This library provides the
//! pieces that make that work:
//!
//! ## Core Components
//!
//! - **IdentityCarrier**: Ordered snapshot of a call's metadata, the unit of propagation
//! - **MetadataRelay**: Forwards an inbound carrier and payload to an upstream peer verbatim
//! - **IdentityResolver**: Turns a carrier into a caller/tenant identity at the terminal hop
//! - **UnverifiedClaims**: Bearer-token payload decoded WITHOUT signature verification
//!
//! ## Usage Example
//!
//! ### Relay Hop
//!
//! ```rust,no_run
//! use identity_propagation::{IdentityCarrier, MetadataRelay, UpstreamCall};
//! use tonic::{Request, Response, Status};
//!
//! async fn forward<U>(
//!     relay: &MetadataRelay<U>,
//!     request: Request<String>,
//! ) -> Result<Response<String>, Status>
//! where
//!     U: UpstreamCall<String, String>,
//! {
//!     let carrier = IdentityCarrier::from_request(&request);
//!     relay.relay(&carrier, request.into_inner()).await
//! }
//! ```
//!
//! ### Terminal Hop
//!
//! ```rust
//! use identity_propagation::{IdentityCarrier, IdentityResolver};
//! use tonic::Request;
//!
//! let mut request = Request::new(());
//! request.metadata_mut().insert("x-user-id", "alice".parse().unwrap());
//!
//! let identity = IdentityResolver::default().resolve(&IdentityCarrier::from_request(&request));
//! assert_eq!(identity.caller_id, "alice");
//! assert_eq!(identity.tenant_id, "default-tenant");
//! ```
//!
//! ## Trust Model
//!
//! - The trusted caller header is assumed to be set (and sanitised) by the gateway
//! - The bearer fallback never verifies a signature; its result is tagged
//!   [`IdentitySource::UnverifiedClaim`] and must only be relied on behind a
//!   gateway that already verified the token
//! - Missing or malformed identity never fails a request; sentinels are used instead

mod carrier;
mod claims;
mod relay;
mod resolver;

pub use carrier::{CarrierError, IdentityCarrier};
pub use claims::{bearer_token, subject_from_authorization, ClaimError, UnverifiedClaims};
pub use relay::{MetadataRelay, UpstreamCall};
pub use resolver::{IdentityResolver, IdentitySource, ResolvedIdentity, ResolverConfig};

/// Canonical header names
pub mod headers {
    /// Bearer credential, `Bearer <token>`
    pub const AUTHORIZATION: &str = "authorization";
    /// Caller id injected by the gateway after it authenticated the caller
    pub const CALLER_ID: &str = "x-user-id";
    /// Tenant id injected by the gateway
    pub const TENANT_ID: &str = "x-tenant-id";
}

/// Caller id used when no identity signal is present
pub const UNKNOWN_CALLER: &str = "unknown";

/// Tenant id used when no tenant header is present
pub const DEFAULT_TENANT: &str = "default-tenant";

// Re-export tonic Status for convenience
pub use tonic::Status;
