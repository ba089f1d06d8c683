/// gRPC server implementation for user-info-service
///
/// Implements all RPCs from user_service.proto:
/// - GetUserInfo: greet the resolved caller (terminal) or forward the call
///   with its metadata untouched (relay)
use identity_propagation::{
    IdentityCarrier, IdentityResolver, MetadataRelay, ResolvedIdentity, UpstreamCall,
};
use tonic::transport::Channel;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use super::user::v1::user_service_client::UserServiceClient;
use super::user::v1::user_service_server::UserService;
use super::user::v1::{UserRequest, UserResponse};

#[tonic::async_trait]
impl UpstreamCall<UserRequest, UserResponse> for UserServiceClient<Channel> {
    async fn call(&self, request: Request<UserRequest>) -> Result<Response<UserResponse>, Status> {
        // Clones share the underlying channel
        self.clone().get_user_info(request).await
    }
}

/// What this process does with an inbound call
#[derive(Debug, Clone)]
pub enum EndpointMode<U = UserServiceClient<Channel>> {
    Terminal(IdentityResolver),
    Relay(MetadataRelay<U>),
}

/// User info gRPC service
#[derive(Debug, Clone)]
pub struct UserInfoService<U = UserServiceClient<Channel>> {
    service_name: String,
    mode: EndpointMode<U>,
}

impl<U> UserInfoService<U> {
    pub fn new(service_name: impl Into<String>, mode: EndpointMode<U>) -> Self {
        Self {
            service_name: service_name.into(),
            mode,
        }
    }

    pub fn terminal(service_name: impl Into<String>, resolver: IdentityResolver) -> Self {
        Self::new(service_name, EndpointMode::Terminal(resolver))
    }

    pub fn relay(service_name: impl Into<String>, upstream: U) -> Self {
        Self::new(service_name, EndpointMode::Relay(MetadataRelay::new(upstream)))
    }

    pub fn mode(&self) -> &EndpointMode<U> {
        &self.mode
    }
}

/// Reply produced by the terminal hop
pub fn greeting(identity: &ResolvedIdentity) -> UserResponse {
    UserResponse {
        message: format!("Hello user {}!", identity.caller_id),
        tenant_id: identity.tenant_id.clone(),
    }
}

#[tonic::async_trait]
impl<U> UserService for UserInfoService<U>
where
    U: UpstreamCall<UserRequest, UserResponse> + 'static,
{
    /// Greet the caller, or forward to the next hop
    async fn get_user_info(
        &self,
        request: Request<UserRequest>,
    ) -> std::result::Result<Response<UserResponse>, Status> {
        let carrier = IdentityCarrier::from_request(&request);
        let req = request.into_inner();

        match &self.mode {
            EndpointMode::Terminal(resolver) => {
                let identity = resolver.resolve(&carrier);

                info!(
                    service = %self.service_name,
                    request_id = %req.id,
                    caller_id = %identity.caller_id,
                    tenant_id = %identity.tenant_id,
                    source = ?identity.source,
                    "Resolved caller identity"
                );

                Ok(Response::new(greeting(&identity)))
            }
            EndpointMode::Relay(relay) => {
                info!(
                    service = %self.service_name,
                    request_id = %req.id,
                    metadata_entries = carrier.len(),
                    "Forwarding GetUserInfo upstream"
                );

                relay.relay(&carrier, req).await.map_err(|status| {
                    warn!(
                        service = %self.service_name,
                        code = ?status.code(),
                        message = %status.message(),
                        "Upstream GetUserInfo failed"
                    );
                    status
                })
            }
        }
    }
}
