//! Deterministic binary encoding for dynamic messages.
//!
//! Map values live in hash maps, so encoding them in iteration order would make
//! the output depend on hashing. Here known fields are written in field-number
//! order, map entries sorted by key, and message-typed values recurse through the
//! same rules. Scalar, enum and repeated scalar fields are delegated to
//! `prost-reflect` one field at a time, which is already order-stable.
use prost::encoding::{WireType, encode_key, encode_varint};
use prost_reflect::{
    DynamicMessage, FieldDescriptor, Kind, MapKey, MessageDescriptor, ReflectMessage, Value,
};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Encodes `message` so that equal logical content always yields equal bytes.
///
/// Unknown fields and extensions are appended after the known fields.
pub fn encode(message: &DynamicMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(message, &mut buf);
    buf
}

fn encode_into(message: &DynamicMessage, buf: &mut Vec<u8>) {
    let descriptor = message.descriptor();

    for (field, value) in message.fields() {
        encode_field(&descriptor, &field, value, buf);
    }

    if message.unknown_fields().next().is_some() || message.extensions().next().is_some() {
        let mut rest = message.clone();
        for field in descriptor.fields() {
            rest.clear_field(&field);
        }
        buf.extend(prost::Message::encode_to_vec(&rest));
    }
}

fn encode_field(
    descriptor: &MessageDescriptor,
    field: &FieldDescriptor,
    value: &Value,
    buf: &mut Vec<u8>,
) {
    match (field.kind(), value) {
        (Kind::Message(entry), Value::Map(entries)) if field.is_map() => {
            encode_map(field.number(), &entry, entries, buf);
        }
        (Kind::Message(_), Value::Message(nested)) if !field.is_group() => {
            write_length_delimited(field.number(), &encode(nested), buf);
        }
        (Kind::Message(_), Value::List(items)) if !field.is_group() => {
            for item in items {
                if let Value::Message(nested) = item {
                    write_length_delimited(field.number(), &encode(nested), buf);
                }
            }
        }
        _ => {
            let mut single = DynamicMessage::new(descriptor.clone());
            single.set_field(field, value.clone());
            buf.extend(prost::Message::encode_to_vec(&single));
        }
    }
}

fn encode_map(
    number: u32,
    entry: &MessageDescriptor,
    entries: &HashMap<MapKey, Value>,
    buf: &mut Vec<u8>,
) {
    let key_field = entry.map_entry_key_field();
    let value_field = entry.map_entry_value_field();

    let mut sorted: Vec<_> = entries.iter().collect();
    sorted.sort_by(|(a, _), (b, _)| compare_keys(a, b));

    for (key, value) in sorted {
        let mut entry_message = DynamicMessage::new(entry.clone());
        entry_message.set_field(&key_field, key_value(key));
        entry_message.set_field(&value_field, value.clone());
        write_length_delimited(number, &encode(&entry_message), buf);
    }
}

fn write_length_delimited(number: u32, bytes: &[u8], buf: &mut Vec<u8>) {
    encode_key(number, WireType::LengthDelimited, buf);
    encode_varint(bytes.len() as u64, buf);
    buf.extend_from_slice(bytes);
}

fn key_value(key: &MapKey) -> Value {
    match key {
        MapKey::Bool(v) => Value::Bool(*v),
        MapKey::I32(v) => Value::I32(*v),
        MapKey::I64(v) => Value::I64(*v),
        MapKey::U32(v) => Value::U32(*v),
        MapKey::U64(v) => Value::U64(*v),
        MapKey::String(v) => Value::String(v.clone()),
    }
}

fn compare_keys(a: &MapKey, b: &MapKey) -> Ordering {
    match (a, b) {
        (MapKey::Bool(a), MapKey::Bool(b)) => a.cmp(b),
        (MapKey::I32(a), MapKey::I32(b)) => a.cmp(b),
        (MapKey::I64(a), MapKey::I64(b)) => a.cmp(b),
        (MapKey::U32(a), MapKey::U32(b)) => a.cmp(b),
        (MapKey::U64(a), MapKey::U64(b)) => a.cmp(b),
        (MapKey::String(a), MapKey::String(b)) => a.cmp(b),
        // A map has one key kind, mixed kinds cannot occur
        _ => rank(a).cmp(&rank(b)),
    }
}

fn rank(key: &MapKey) -> u8 {
    match key {
        MapKey::Bool(_) => 0,
        MapKey::I32(_) => 1,
        MapKey::I64(_) => 2,
        MapKey::U32(_) => 3,
        MapKey::U64(_) => 4,
        MapKey::String(_) => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::{
        DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
        MessageOptions,
        field_descriptor_proto::{Label, Type},
    };
    use prost_reflect::DescriptorPool;

    /// `message Bag { map<string, int32> counts = 1; string note = 2; }`
    fn bag() -> MessageDescriptor {
        let scalar = |name: &str, number: i32, ty: Type, label: Label| FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            r#type: Some(ty as i32),
            label: Some(label as i32),
            json_name: Some(name.to_string()),
            ..Default::default()
        };

        let entry = DescriptorProto {
            name: Some("CountsEntry".to_string()),
            field: vec![
                scalar("key", 1, Type::String, Label::Optional),
                scalar("value", 2, Type::Int32, Label::Optional),
            ],
            options: Some(MessageOptions {
                map_entry: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut counts = scalar("counts", 1, Type::Message, Label::Repeated);
        counts.type_name = Some(".t.Bag.CountsEntry".to_string());

        let file = FileDescriptorProto {
            name: Some("bag.proto".to_string()),
            package: Some("t".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![DescriptorProto {
                name: Some("Bag".to_string()),
                field: vec![counts, scalar("note", 2, Type::String, Label::Optional)],
                nested_type: vec![entry],
                ..Default::default()
            }],
            ..Default::default()
        };

        let pool = DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: vec![file] })
            .unwrap();
        pool.get_message_by_name("t.Bag").unwrap()
    }

    fn with_counts(pairs: &[(&str, i32)]) -> DynamicMessage {
        let descriptor = bag();
        let mut message = DynamicMessage::new(descriptor.clone());
        let counts = pairs
            .iter()
            .map(|(k, v)| (MapKey::String(k.to_string()), Value::I32(*v)))
            .collect::<HashMap<_, _>>();
        message.set_field_by_name("counts", Value::Map(counts));
        message.set_field_by_name("note", Value::String("n".to_string()));
        message
    }

    #[test]
    fn map_order_does_not_change_bytes() {
        let forward = with_counts(&[("a", 1), ("b", 2), ("c", 3), ("d", 4)]);
        let backward = with_counts(&[("d", 4), ("c", 3), ("b", 2), ("a", 1)]);

        assert_eq!(encode(&forward), encode(&backward));
    }

    #[test]
    fn output_decodes_back_to_the_same_message() {
        let message = with_counts(&[("x", 10), ("y", -3)]);
        let decoded =
            DynamicMessage::decode(message.descriptor(), encode(&message).as_slice()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn entries_are_sorted_by_key() {
        let bytes = encode(&with_counts(&[("b", 2), ("a", 1)]));
        let a = bytes.iter().position(|b| *b == b'a').unwrap();
        let b = bytes.iter().position(|b| *b == b'b').unwrap();
        assert!(a < b);
    }
}
