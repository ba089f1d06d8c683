// Build script for user-info-service
// Compiles user_service.proto for gRPC server and client code generation
fn main() {
    println!("cargo:rerun-if-changed=../proto/services/user_service.proto");

    // user-info-service PROVIDES UserService (terminal mode) and CALLS it
    // (relay mode), so both server and client code are generated.
    // The descriptor set backs gRPC reflection for schema-less gateways.
    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR").unwrap());

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(out_dir.join("user_service_descriptor.bin"))
        .compile_protos(
            &["../proto/services/user_service.proto"],
            &["../proto/services"],
        )
        .expect("Failed to compile user_service.proto for user-info-service");
}
