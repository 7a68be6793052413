use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut, Bytes};

use crate::error::{RemoteError, RouterError};
use crate::messaging::message::{Message, TypeTag};
use crate::messaging::serializer::Serializer;


const KIND_TOPIC: u8 = 1;
const KIND_REQUEST: u8 = 2;
const KIND_RESPONSE: u8 = 3;

const OUTCOME_OK: u8 = 0;
const OUTCOME_ERR: u8 = 1;

/// A [Package] is the envelope for everything that goes over the wire. Its body is the message
///  as converted by a [Serializer]; the envelope adds the message's [TypeTag] and, for requests and
///  responses, the correlation id.
///
/// A response's outcome is either the typed response body or the descriptor of the error that
///  the remote side ran into.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Package {
    Topic {
        type_tag: TypeTag,
        body: Bytes,
    },
    Request {
        request_id: u64,
        type_tag: TypeTag,
        body: Bytes,
    },
    Response {
        request_id: u64,
        outcome: Result<(TypeTag, Bytes), RemoteError>,
    },
}

impl Package {
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Package::Topic { .. } => None,
            Package::Request { request_id, .. } => Some(*request_id),
            Package::Response { request_id, .. } => Some(*request_id),
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        match self {
            Package::Topic { type_tag, body } => {
                buf.put_u8(KIND_TOPIC);
                put_str(buf, type_tag.as_str());
                put_bytes(buf, body);
            }
            Package::Request { request_id, type_tag, body } => {
                buf.put_u8(KIND_REQUEST);
                buf.put_u64(*request_id);
                put_str(buf, type_tag.as_str());
                put_bytes(buf, body);
            }
            Package::Response { request_id, outcome } => {
                buf.put_u8(KIND_RESPONSE);
                buf.put_u64(*request_id);
                match outcome {
                    Ok((type_tag, body)) => {
                        buf.put_u8(OUTCOME_OK);
                        put_str(buf, type_tag.as_str());
                        put_bytes(buf, body);
                    }
                    Err(e) => {
                        buf.put_u8(OUTCOME_ERR);
                        put_str(buf, e.kind());
                        put_str(buf, e.message());
                    }
                }
            }
        }
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Package> {
        let package = match buf.try_get_u8()? {
            KIND_TOPIC => {
                let type_tag = try_get_type_tag(buf)?;
                let body = try_get_bytes(buf)?;
                Package::Topic { type_tag, body }
            }
            KIND_REQUEST => {
                let request_id = buf.try_get_u64()?;
                let type_tag = try_get_type_tag(buf)?;
                let body = try_get_bytes(buf)?;
                Package::Request { request_id, type_tag, body }
            }
            KIND_RESPONSE => {
                let request_id = buf.try_get_u64()?;
                let outcome = match buf.try_get_u8()? {
                    OUTCOME_OK => {
                        let type_tag = try_get_type_tag(buf)?;
                        let body = try_get_bytes(buf)?;
                        Ok((type_tag, body))
                    }
                    OUTCOME_ERR => {
                        let kind = try_get_string(buf)?;
                        let message = try_get_string(buf)?;
                        Err(RemoteError::new(kind, message))
                    }
                    n => return Err(anyhow!("invalid response outcome discriminator: {}", n)),
                };
                Package::Response { request_id, outcome }
            }
            n => return Err(anyhow!("invalid package kind: {}", n)),
        };

        if buf.has_remaining() {
            bail!("{} trailing bytes after package", buf.remaining());
        }
        Ok(package)
    }
}

fn put_str(buf: &mut impl BufMut, s: &str) {
    put_bytes(buf, s.as_bytes());
}

fn put_bytes(buf: &mut impl BufMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn try_get_bytes(buf: &mut impl Buf) -> anyhow::Result<Bytes> {
    let len = buf.try_get_u32()? as usize;
    if buf.remaining() < len {
        bail!("buffer underflow: expected {} bytes, {} remaining", len, buf.remaining());
    }
    Ok(buf.copy_to_bytes(len))
}

fn try_get_string(buf: &mut impl Buf) -> anyhow::Result<String> {
    let bytes = try_get_bytes(buf)?;
    Ok(String::from_utf8(bytes.to_vec())?)
}

fn try_get_type_tag(buf: &mut impl Buf) -> anyhow::Result<TypeTag> {
    Ok(TypeTag::from_wire(try_get_string(buf)?))
}


/// Creates packages from typed messages and extracts typed messages from packages. All
///  conversion between messages and bytes goes through a [PackageFactory].
#[derive(Copy, Clone, Debug)]
pub struct PackageFactory {
    serializer: Serializer,
    max_message_size: usize,
}

impl PackageFactory {
    pub fn new(serializer: Serializer, max_message_size: usize) -> PackageFactory {
        PackageFactory {
            serializer,
            max_message_size,
        }
    }

    pub fn serializer(&self) -> Serializer {
        self.serializer
    }

    pub fn create_topic<T: Message>(&self, topic: &T) -> Result<Package, RouterError> {
        Ok(Package::Topic {
            type_tag: T::type_tag(),
            body: self.serialize(topic)?,
        })
    }

    pub fn create_request<T: Message>(&self, request_id: u64, request: &T) -> Result<Package, RouterError> {
        Ok(Package::Request {
            request_id,
            type_tag: T::type_tag(),
            body: self.serialize(request)?,
        })
    }

    pub fn create_response<T: Message>(&self, request_id: u64, response: &T) -> Result<Package, RouterError> {
        Ok(Package::Response {
            request_id,
            outcome: Ok((T::type_tag(), self.serialize(response)?)),
        })
    }

    pub fn create_error_response(&self, request_id: u64, error: RemoteError) -> Package {
        Package::Response {
            request_id,
            outcome: Err(error),
        }
    }

    /// serializes a message's body, enforcing the maximum message size
    pub fn serialize<T: Message>(&self, message: &T) -> Result<Bytes, RouterError> {
        let body = self.serializer.serialize(message)?;
        if body.len() > self.max_message_size {
            return Err(RouterError::MessageTooLarge {
                size: body.len(),
                max: self.max_message_size,
            });
        }
        Ok(body)
    }

    pub fn extract_topic<T: Message>(&self, package: &Package) -> Result<T, RouterError> {
        match package {
            Package::Topic { type_tag, body } => self.extract_body(type_tag, body),
            other => Err(RouterError::InvalidPackage(format!("expected a topic, was {:?}", other))),
        }
    }

    pub fn extract_request<T: Message>(&self, package: &Package) -> Result<T, RouterError> {
        match package {
            Package::Request { type_tag, body, .. } => self.extract_body(type_tag, body),
            other => Err(RouterError::InvalidPackage(format!("expected a request, was {:?}", other))),
        }
    }

    /// An error outcome is surfaced as [RouterError::Remote]
    pub fn extract_response<T: Message>(&self, package: &Package) -> Result<T, RouterError> {
        match package {
            Package::Response { outcome: Ok((type_tag, body)), .. } => self.extract_body(type_tag, body),
            Package::Response { outcome: Err(e), .. } => Err(RouterError::Remote(e.clone())),
            other => Err(RouterError::InvalidPackage(format!("expected a response, was {:?}", other))),
        }
    }

    fn extract_body<T: Message>(&self, type_tag: &TypeTag, body: &[u8]) -> Result<T, RouterError> {
        if type_tag != &T::type_tag() {
            return Err(RouterError::UnexpectedMessageType {
                expected: T::type_tag(),
                actual: type_tag.clone(),
            });
        }
        self.serializer.deserialize(body)
    }

    pub fn is_valid_topic(&self, package: &Package) -> bool {
        matches!(package, Package::Topic { type_tag, .. } if !type_tag.as_str().is_empty())
    }

    pub fn is_valid_request(&self, package: &Package) -> bool {
        matches!(package, Package::Request { type_tag, .. } if !type_tag.as_str().is_empty())
    }

    pub fn is_valid_response(&self, package: &Package) -> bool {
        match package {
            Package::Response { outcome: Ok((type_tag, _)), .. } => !type_tag.as_str().is_empty(),
            Package::Response { outcome: Err(_), .. } => true,
            _ => false,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;
    use crate::test_util::message::{TestEvent, TestRequest, TestResponse};

    fn factory() -> PackageFactory {
        PackageFactory::new(Serializer::MessagePack, 1024)
    }

    fn ser_deser(package: &Package) -> Package {
        let mut buf = BytesMut::new();
        package.ser(&mut buf);
        Package::try_deser(&mut buf.freeze()).unwrap()
    }

    #[test]
    fn test_request_over_the_wire() {
        let factory = factory();
        let package = factory.create_request(17, &TestRequest { value: 41 }).unwrap();

        let received = ser_deser(&package);
        assert_eq!(received, package);
        assert_eq!(received.request_id(), Some(17));
        assert!(factory.is_valid_request(&received));
        assert_eq!(factory.extract_request::<TestRequest>(&received).unwrap(), TestRequest { value: 41 });
    }

    #[test]
    fn test_error_response_over_the_wire() {
        let factory = factory();
        let package = factory.create_error_response(3, RemoteError::new("handler", "division by zero"));

        let received = ser_deser(&package);
        assert!(factory.is_valid_response(&received));
        match factory.extract_response::<TestResponse>(&received) {
            Err(RouterError::Remote(e)) => {
                assert_eq!(e.kind(), "handler");
                assert_eq!(e.message(), "division by zero");
            }
            other => panic!("expected remote error, was {:?}", other),
        }
    }

    #[test]
    fn test_extract_wrong_type() {
        let factory = factory();
        let package = factory.create_response(1, &TestRequest { value: 1 }).unwrap();
        match factory.extract_response::<TestResponse>(&package) {
            Err(RouterError::UnexpectedMessageType { expected, actual }) => {
                assert_eq!(expected, TypeTag::of::<TestResponse>());
                assert_eq!(actual, TypeTag::of::<TestRequest>());
            }
            other => panic!("expected type mismatch, was {:?}", other),
        }
    }

    #[test]
    fn test_extract_wrong_type_for_topics_and_requests() {
        let factory = factory();
        let topic = factory.create_topic(&TestEvent { value: 1 }).unwrap();
        assert!(matches!(factory.extract_topic::<TestRequest>(&topic), Err(RouterError::UnexpectedMessageType { .. })));

        let request = factory.create_request(1, &TestEvent { value: 1 }).unwrap();
        match factory.extract_request::<TestRequest>(&request) {
            Err(e) => {
                assert_eq!(e.kind(), "unexpected_message_type");
                assert!(!e.to_string().contains("response"), "{}", e);
            }
            other => panic!("expected type mismatch, was {:?}", other),
        }
    }

    #[test]
    fn test_message_too_large() {
        let factory = PackageFactory::new(Serializer::Json, 8);
        match factory.create_topic(&TestEvent { value: 1234567890 }) {
            Err(RouterError::MessageTooLarge { max, .. }) => assert_eq!(max, 8),
            other => panic!("expected message too large, was {:?}", other),
        }
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::unknown_kind(vec![99])]
    #[case::truncated_request_id(vec![KIND_REQUEST, 0, 0, 0])]
    #[case::truncated_body(vec![KIND_TOPIC, 0, 0, 0, 1, b'x', 0, 0, 0, 5, 1])]
    #[case::invalid_outcome(vec![KIND_RESPONSE, 0, 0, 0, 0, 0, 0, 0, 1, 7])]
    #[case::invalid_utf8(vec![KIND_TOPIC, 0, 0, 0, 1, 0xff, 0, 0, 0, 0])]
    #[case::trailing_bytes(vec![KIND_TOPIC, 0, 0, 0, 1, b'x', 0, 0, 0, 0, 42])]
    fn test_try_deser_invalid(#[case] buf: Vec<u8>) {
        assert!(Package::try_deser(&mut buf.as_slice()).is_err());
    }
}
