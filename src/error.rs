use std::fmt::{Display, Formatter};
use std::time::Duration;

use thiserror::Error;

use crate::messaging::address::{Address, TransportKind};
use crate::messaging::message::TypeTag;
use crate::routing::routing::Routing;


#[derive(Debug, Error)]
pub enum RouterError {
    #[error("a routing for {type_tag} is already registered: existing {existing}, attempted {attempted}")]
    RoutingAlreadyRegistered {
        type_tag: TypeTag,
        existing: Routing,
        attempted: Routing,
    },
    #[error("no routing registered for {0}")]
    RoutingNotFound(TypeTag),
    #[error("a factory for transport {0} is already registered")]
    FactoryAlreadyRegistered(TransportKind),
    #[error("no {cache} factory registered for transport {transport}")]
    MissingFactory {
        transport: TransportKind,
        cache: &'static str,
    },
    #[error("address {0} is already bound")]
    AddressAlreadyBound(Address),
    #[error("no handler registered for {0}")]
    HandlerNotFound(TypeTag),
    #[error("a handler for {0} is already registered")]
    HandlerAlreadyRegistered(TypeTag),
    #[error("request handler failed: {0:#}")]
    Handler(anyhow::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("remote error: {0}")]
    Remote(RemoteError),
    #[error("expected a message of type {expected}, got {actual}")]
    UnexpectedMessageType {
        expected: TypeTag,
        actual: TypeTag,
    },
    #[error("invalid package: {0}")]
    InvalidPackage(String),
    #[error("message of {size} bytes exceeds the maximum message size of {max} bytes")]
    MessageTooLarge {
        size: usize,
        max: usize,
    },
    #[error("(de)serializing {type_tag} failed: {reason}")]
    Serialization {
        type_tag: TypeTag,
        reason: String,
    },
    #[error("the reply slot was dropped before a result was delivered")]
    ReplyDropped,
    #[error("already running")]
    AlreadyRunning,
    #[error("not running")]
    NotRunning,
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl RouterError {
    /// a stable, machine-readable name for the error's condition. This is what is sent to the
    ///  requesting side as part of an error response.
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::RoutingAlreadyRegistered { .. } => "routing_already_registered",
            RouterError::RoutingNotFound(_) => "routing_not_found",
            RouterError::FactoryAlreadyRegistered(_) => "factory_already_registered",
            RouterError::MissingFactory { .. } => "missing_factory",
            RouterError::AddressAlreadyBound(_) => "address_already_bound",
            RouterError::HandlerNotFound(_) => "handler_not_found",
            RouterError::HandlerAlreadyRegistered(_) => "handler_already_registered",
            RouterError::Handler(_) => "handler",
            RouterError::Timeout(_) => "timeout",
            RouterError::Remote(_) => "remote",
            RouterError::UnexpectedMessageType { .. } => "unexpected_message_type",
            RouterError::InvalidPackage(_) => "invalid_package",
            RouterError::MessageTooLarge { .. } => "message_too_large",
            RouterError::Serialization { .. } => "serialization",
            RouterError::ReplyDropped => "reply_dropped",
            RouterError::AlreadyRunning => "already_running",
            RouterError::NotRunning => "not_running",
            RouterError::Transport(_) => "transport",
        }
    }
}


/// The error descriptor carried in an error response: the requesting side gets it back as
///  [RouterError::Remote] rather than as a re-raised native error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteError {
    kind: String,
    message: String,
}

impl RemoteError {
    pub const BROKEN_PROMISE: &'static str = "broken_promise";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> RemoteError {
        RemoteError {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn broken_promise() -> RemoteError {
        RemoteError::new(Self::BROKEN_PROMISE, "the request was dropped without a response")
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl From<&RouterError> for RemoteError {
    fn from(value: &RouterError) -> Self {
        match value {
            RouterError::Remote(e) => e.clone(),
            e => RemoteError::new(e.kind(), e.to_string()),
        }
    }
}
