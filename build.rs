fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_file = "proto/framefarm.proto";

    println!("cargo:rerun-if-changed={}", proto_file);

    // Use the vendored protoc unless the environment already provides one
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&[proto_file], &["proto"])?;

    Ok(())
}
