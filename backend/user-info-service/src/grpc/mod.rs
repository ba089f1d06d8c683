/// gRPC server module for user-info-service
///
/// Exports:
/// - UserInfoService: `user.v1.UserService` implementation (terminal or relay)
/// - user: Generated protobuf types from user_service.proto
pub mod server;

pub use server::{EndpointMode, UserInfoService};

// Import generated protobuf types
pub mod user {
    pub mod v1 {
        tonic::include_proto!("user.v1");
    }
}

/// Encoded descriptors for gRPC reflection
pub const FILE_DESCRIPTOR_SET: &[u8] =
    tonic::include_file_descriptor_set!("user_service_descriptor");
