//! Metadata Relay
//!
//! Forwards a call to an upstream peer with the inbound carrier as its
//! metadata. The relay adds, drops and rewrites nothing, and returns the
//! upstream's response or status untouched.

use crate::carrier::IdentityCarrier;
use async_trait::async_trait;
use tonic::{Request, Response, Status};
use tracing::debug;

/// A single upstream RPC
///
/// Implemented for generated tonic clients by the services that use them,
/// and by in-memory fakes in tests.
#[async_trait]
pub trait UpstreamCall<Req, Resp>: Send + Sync
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn call(&self, request: Request<Req>) -> Result<Response<Resp>, Status>;
}

/// Transparent hop toward one upstream peer
///
/// No retries: a failed upstream call is reported to the caller as-is.
/// Dropping the future returned by [`MetadataRelay::relay`] (for example when
/// the inbound call is cancelled) drops the outgoing call with it.
#[derive(Debug, Clone)]
pub struct MetadataRelay<U> {
    upstream: U,
}

impl<U> MetadataRelay<U> {
    pub fn new(upstream: U) -> Self {
        Self { upstream }
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    pub async fn relay<Req, Resp>(
        &self,
        inbound: &IdentityCarrier,
        payload: Req,
    ) -> Result<Response<Resp>, Status>
    where
        U: UpstreamCall<Req, Resp>,
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let mut request = Request::new(payload);
        // Inbound deadline (grpc-timeout) travels with the rest of the metadata
        *request.metadata_mut() = inbound.to_metadata();

        debug!(entries = inbound.len(), "Relaying call upstream");

        self.upstream.call(request).await
    }
}
