//! # Dynamic gRPC Transport
//!
//! The building blocks for calling a method known only from a [`crate::DescriptorSet`].
//!
//! * [`codec`]: a `tonic` codec moving [`prost_reflect::DynamicMessage`]s over the wire.
//! * [`client`]: a thin generic client exposing the four streaming shapes.
//! * [`session`]: connection establishment (timeouts, keepalive).
//! * [`invoke`]: the [`CallInvoker`] that ties the pieces together and turns any call
//!   into a single stream of responses.
pub mod client;
pub mod codec;
pub mod invoke;
pub mod session;

pub use client::{GrpcClient, GrpcRequestError, RequestMetadata};
pub use codec::DynamicCodec;
pub use invoke::{CallInvoker, CallOptions, InvokeError, RequestSource, ResponseStream};
pub use session::{CallSession, SessionError, SessionOptions};
