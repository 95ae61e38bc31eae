//! # Descriptor Set
//!
//! This module handles the loading and querying of Protobuf `FileDescriptorSet`s.
//! A [`DescriptorSet`] is the only source of message and service shapes for the
//! rest of an invocation; nothing in this crate relies on generated code for the
//! schemas it processes.
use prost_reflect::{
    DescriptorPool, FieldDescriptor, FileDescriptor, MessageDescriptor, MethodDescriptor,
    ServiceDescriptor,
};
use std::fmt;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum LookupError {
    #[error("Failed to read descriptor file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode descriptor set: {0}")]
    Decode(#[from] prost_reflect::DescriptorError),
    #[error("Invalid method path. Expected format 'package.Service/Method', got '{0}'")]
    InvalidMethodPath(String),
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),
    #[error("Method '{method}' not found in service '{service}'")]
    MethodNotFound { service: String, method: String },
    #[error("Message '{0}' not found")]
    MessageNotFound(String),
    #[error("Field '{0}' not found")]
    FieldNotFound(String),
}

/// How many messages flow in each direction of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingCardinality {
    Unary,
    ClientStream,
    ServerStream,
    BidiStream,
}

impl StreamingCardinality {
    pub fn of(method: &MethodDescriptor) -> Self {
        match (method.is_client_streaming(), method.is_server_streaming()) {
            (false, false) => Self::Unary,
            (true, false) => Self::ClientStream,
            (false, true) => Self::ServerStream,
            (true, true) => Self::BidiStream,
        }
    }

    /// Whether the request side is a sequence of messages.
    pub fn streams_requests(&self) -> bool {
        matches!(self, Self::ClientStream | Self::BidiStream)
    }
}

impl fmt::Display for StreamingCardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unary => "unary",
            Self::ClientStream => "client-stream",
            Self::ServerStream => "server-stream",
            Self::BidiStream => "bidi-stream",
        })
    }
}

/// An immutable, decoded `FileDescriptorSet`.
#[derive(Debug, Clone)]
pub struct DescriptorSet {
    pool: DescriptorPool,
    encoded: Vec<u8>,
}

impl DescriptorSet {
    /// Decodes a `FileDescriptorSet` from its binary encoding.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, LookupError> {
        let encoded = bytes.into();
        let pool = DescriptorPool::decode(encoded.as_slice())?;
        Ok(Self { pool, encoded })
    }

    /// Loads a `FileDescriptorSet` from a file on disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LookupError> {
        Self::from_bytes(std::fs::read(path)?)
    }

    /// The binary encoding this set was decoded from.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// Files in the set, in the order the compiler produced them.
    pub fn files(&self) -> impl Iterator<Item = FileDescriptor> + '_ {
        self.pool.files()
    }

    pub fn services(&self) -> Vec<String> {
        self.pool
            .services()
            .map(|s| s.full_name().to_string())
            .collect()
    }

    /// Resolves a full method path (e.g. `my.package.MyService/MyMethod`).
    ///
    /// A leading `/` is tolerated since that is how the method appears on the wire.
    pub fn method(&self, method_path: &str) -> Result<MethodDescriptor, LookupError> {
        let (service_name, method_name) = method_path
            .trim_start_matches('/')
            .split_once('/')
            .filter(|(s, m)| !s.trim().is_empty() && !m.trim().is_empty())
            .ok_or_else(|| LookupError::InvalidMethodPath(method_path.to_string()))?;

        self.service(service_name)?
            .methods()
            .find(|m| m.name() == method_name)
            .ok_or_else(|| LookupError::MethodNotFound {
                service: service_name.to_string(),
                method: method_name.to_string(),
            })
    }

    pub fn service(&self, name: &str) -> Result<ServiceDescriptor, LookupError> {
        self.pool
            .get_service_by_name(name)
            .ok_or_else(|| LookupError::ServiceNotFound(name.to_string()))
    }

    pub fn message(&self, name: &str) -> Result<MessageDescriptor, LookupError> {
        self.pool
            .get_message_by_name(name.trim_start_matches('.'))
            .ok_or_else(|| LookupError::MessageNotFound(name.to_string()))
    }

    /// Resolves `package.Message.field` to the field's descriptor.
    pub fn field(&self, path: &str) -> Result<FieldDescriptor, LookupError> {
        let (message, field) = path
            .rsplit_once('.')
            .ok_or_else(|| LookupError::FieldNotFound(path.to_string()))?;

        self.message(message)?
            .get_field_by_name(field)
            .ok_or_else(|| LookupError::FieldNotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use prost_types::{
        DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
        MethodDescriptorProto, ServiceDescriptorProto, field_descriptor_proto::Type,
    };

    fn greeter_set() -> DescriptorSet {
        let message = |name: &str, field: &str| DescriptorProto {
            name: Some(name.to_string()),
            field: vec![FieldDescriptorProto {
                name: Some(field.to_string()),
                number: Some(1),
                r#type: Some(Type::String as i32),
                json_name: Some(field.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };

        let method = |name: &str, client: bool, server: bool| MethodDescriptorProto {
            name: Some(name.to_string()),
            input_type: Some(".pkg.HelloRequest".to_string()),
            output_type: Some(".pkg.HelloReply".to_string()),
            client_streaming: Some(client),
            server_streaming: Some(server),
            ..Default::default()
        };

        let file = FileDescriptorProto {
            name: Some("greeter.proto".to_string()),
            package: Some("pkg".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![
                message("HelloRequest", "name"),
                message("HelloReply", "message"),
            ],
            service: vec![ServiceDescriptorProto {
                name: Some("Greeter".to_string()),
                method: vec![
                    method("SayHello", false, false),
                    method("Upload", true, false),
                    method("Watch", false, true),
                    method("Chat", true, true),
                ],
                ..Default::default()
            }],
            ..Default::default()
        };

        let bytes = FileDescriptorSet { file: vec![file] }.encode_to_vec();
        DescriptorSet::from_bytes(bytes).unwrap()
    }

    #[test]
    fn resolves_methods_and_cardinality() {
        let set = greeter_set();

        let cases = [
            ("pkg.Greeter/SayHello", StreamingCardinality::Unary),
            ("pkg.Greeter/Upload", StreamingCardinality::ClientStream),
            ("/pkg.Greeter/Watch", StreamingCardinality::ServerStream),
            ("pkg.Greeter/Chat", StreamingCardinality::BidiStream),
        ];

        for (path, expected) in cases {
            let method = set.method(path).unwrap();
            assert_eq!(StreamingCardinality::of(&method), expected, "{path}");
        }
    }

    #[test]
    fn lookup_errors() {
        let set = greeter_set();

        assert!(matches!(
            set.method("pkg.Greeter"),
            Err(LookupError::InvalidMethodPath(_))
        ));
        assert!(matches!(
            set.method("pkg.Ghost/SayHello"),
            Err(LookupError::ServiceNotFound(name)) if name == "pkg.Ghost"
        ));
        assert!(matches!(
            set.method("pkg.Greeter/Ghost"),
            Err(LookupError::MethodNotFound { method, .. }) if method == "Ghost"
        ));
        assert!(set.message("pkg.HelloRequest").is_ok());
        assert!(set.field("pkg.HelloRequest.name").is_ok());
        assert!(matches!(
            set.field("pkg.HelloRequest.nope"),
            Err(LookupError::FieldNotFound(_))
        ));
    }

    #[test]
    fn rejects_garbage_bytes() {
        assert!(matches!(
            DescriptorSet::from_bytes(vec![0xff, 0xff, 0xff]),
            Err(LookupError::Decode(_))
        ));
    }
}
