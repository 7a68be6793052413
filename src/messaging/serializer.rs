use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::RouterError;
use crate::messaging::message::TypeTag;


/// Converts messages to and from bytes. The routing and dispatch core never looks inside the
///  resulting buffers, so any serde format works as long as both sides agree on it.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Serializer {
    #[default]
    MessagePack,
    Json,
}

impl Serializer {
    pub fn descriptor(&self) -> &'static str {
        match self {
            Serializer::MessagePack => "msgpack",
            Serializer::Json => "json",
        }
    }

    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, RouterError> {
        let buf = match self {
            Serializer::MessagePack => rmp_serde::to_vec_named(value)
                .map_err(|e| serialization_error::<T>(e))?,
            Serializer::Json => serde_json::to_vec(value)
                .map_err(|e| serialization_error::<T>(e))?,
        };
        Ok(Bytes::from(buf))
    }

    pub fn deserialize<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, RouterError> {
        match self {
            Serializer::MessagePack => rmp_serde::from_slice(buf)
                .map_err(|e| serialization_error::<T>(e)),
            Serializer::Json => serde_json::from_slice(buf)
                .map_err(|e| serialization_error::<T>(e)),
        }
    }
}

fn serialization_error<T: ?Sized>(e: impl std::fmt::Display) -> RouterError {
    RouterError::Serialization {
        type_tag: TypeTag::of::<T>(),
        reason: e.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Order {
        id: u64,
        items: Vec<String>,
    }

    #[rstest]
    #[case::msgpack(Serializer::MessagePack)]
    #[case::json(Serializer::Json)]
    fn test_serialize_deserialize(#[case] serializer: Serializer) {
        let order = Order { id: 7, items: vec!["a".to_string(), "b".to_string()] };
        let buf = serializer.serialize(&order).unwrap();
        assert_eq!(serializer.deserialize::<Order>(&buf).unwrap(), order);
    }

    #[rstest]
    #[case::msgpack(Serializer::MessagePack)]
    #[case::json(Serializer::Json)]
    fn test_deserialize_garbage(#[case] serializer: Serializer) {
        match serializer.deserialize::<Order>(&[0xc1, 0xff, 0x00]) {
            Err(RouterError::Serialization { type_tag, .. }) => assert_eq!(type_tag, TypeTag::of::<Order>()),
            other => panic!("expected serialization error, was {:?}", other),
        }
    }

    #[test]
    fn test_json_is_readable() {
        let buf = Serializer::Json.serialize(&Order { id: 1, items: vec![] }).unwrap();
        assert_eq!(&buf[..], br#"{"id":1,"items":[]}"#);
    }
}
