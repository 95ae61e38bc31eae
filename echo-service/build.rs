use std::env::var;
use std::io::Result;

fn main() -> Result<()> {
    // Every file here ends up in the shared descriptor set used by the tests
    let proto_files = &[
        // Services
        "proto/echo.proto",
        "proto/greeter.proto",
        // Plain messages
        "proto/sample.proto",
    ];

    let out_dir = var("OUT_DIR").expect("Missing OUT_DIR environment variable");

    tonic_prost_build::configure()
        .file_descriptor_set_path(format!("{out_dir}/descriptors.bin"))
        .protoc_arg("--experimental_allow_proto3_optional")
        .build_client(false)
        .compile_protos(proto_files, &["proto"])
}
