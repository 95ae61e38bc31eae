//! # Prototool Core
//!
//! `prototool-core` is the library behind the `prototool` CLI. It manages a versioned
//! `protoc` binary, compiles schema files into descriptor sets, and uses those
//! descriptors to convert messages and call gRPC methods without any generated code.
//!
//! ## Key Components
//!
//! * **[`toolchain`]:** Resolves the compiler version and host platform, downloads release
//!   archives, and keeps verified binaries in the on-disk [`BinaryCache`].
//! * **[`compile`]:** Runs `protoc` as a subprocess and parses its diagnostics.
//! * **[`DescriptorSet`]:** The decoded output of a compilation; the only source of message
//!   and service shapes for an invocation.
//! * **[`codec`]:** Converts between binary and structured text (JSON) for any message, with
//!   a deterministic binary encoder.
//! * **[`lint`] and [`format`](mod@format):** Per-file rule boundaries the runner drives concurrently.
//! * **[`CallInvoker`]:** Performs unary and streaming gRPC calls by method name alone.
//! * **[`Runner`]:** One operation per command, and the mapping of failures to exit codes.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod codec;
pub mod compile;
pub mod config;
pub mod descriptor;
pub mod format;
pub mod grpc;
pub mod lint;
pub mod runner;
pub mod toolchain;

pub use descriptor::DescriptorSet;
pub use grpc::CallInvoker;
pub use runner::{ExitError, RunError, Runner, RunnerOptions};
pub use toolchain::BinaryCache;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
