//! # Dynamic Message Codec for tonic
//!
//! Implements `tonic::codec::Codec` for [`DynamicMessage`], so `tonic` can move
//! messages whose shape is only known from a descriptor at runtime.
//!
//! 1. **Encoder**: writes the deterministic encoding from [`crate::codec::wire`]
//!    into the gRPC frame buffer.
//! 2. **Decoder**: decodes the frame against the method's output descriptor.
//!    Fields the descriptor does not know are kept, not dropped.
use crate::codec::wire;
use prost::Message;
use prost::bytes::BufMut;
use prost_reflect::{DynamicMessage, MessageDescriptor, ReflectMessage};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

/// Holds the request and response schemas of a single method.
pub struct DynamicCodec {
    request: MessageDescriptor,
    response: MessageDescriptor,
}

impl DynamicCodec {
    pub fn new(request: MessageDescriptor, response: MessageDescriptor) -> Self {
        Self { request, response }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;

    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder(self.request.clone())
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder(self.response.clone())
    }
}

pub struct DynamicEncoder(MessageDescriptor);

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        if item.descriptor() != self.0 {
            return Err(Status::internal(format!(
                "Expected a '{}' request, got '{}'",
                self.0.full_name(),
                item.descriptor().full_name()
            )));
        }

        dst.put_slice(&wire::encode(&item));
        Ok(())
    }
}

pub struct DynamicDecoder(MessageDescriptor);

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut message = DynamicMessage::new(self.0.clone());
        message.merge(src).map_err(|e| {
            Status::internal(format!(
                "Failed to decode '{}' response: {e}",
                self.0.full_name()
            ))
        })?;

        Ok(Some(message))
    }
}
