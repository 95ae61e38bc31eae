//! # Echo Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide gRPC server implementations
//! and a descriptor set for integration testing `prototool_core`.
//! It is not intended for production use.

pub mod pb {
    include!(concat!(env!("OUT_DIR"), "/echo.rs"));
}

pub mod greeter {
    include!(concat!(env!("OUT_DIR"), "/pkg.rs"));
}

pub use greeter::greeter_server::{Greeter, GreeterServer};
pub use pb::echo_service_server::{EchoService, EchoServiceServer};

/// Encoded `FileDescriptorSet` covering `echo.proto`, `greeter.proto` and `sample.proto`.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("descriptors");
