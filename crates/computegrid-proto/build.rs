use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Get the project root (workspace root)
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    let workspace_root = manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .ok_or("crate must live two levels below the workspace root")?;
    let proto_dir = workspace_root.join("proto");

    // Use the bundled protoc unless the environment provides one
    if env::var_os("PROTOC").is_none() {
        env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    let proto_files = [
        proto_dir.join("computegrid/v1/common.proto"),
        proto_dir.join("computegrid/v1/dispatch_service.proto"),
        proto_dir.join("computegrid/v1/identity_service.proto"),
    ];

    for proto in &proto_files {
        println!("cargo:rerun-if-changed={}", proto.display());
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .protoc_arg("--experimental_allow_proto3_optional")
        .compile_protos(&proto_files, &[proto_dir])?;

    Ok(())
}
