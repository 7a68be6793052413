use std::time::Duration;

use anyhow::bail;

use crate::correlation::remote_task::MIN_REMOTE_TIMEOUT;
use crate::dispatch::topic_dispatcher::DuplicateHandlerPolicy;
use crate::messaging::serializer::Serializer;


#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// identifies the router in logs and in [RouterInfo](crate::router::RouterInfo)
    pub name: String,

    /// the timeout for requests that are sent without an explicit timeout
    pub default_send_timeout: Duration,

    pub serializer: Serializer,
    /// upper limit for the size of a serialized message body, checked on the sending side
    pub max_message_size: usize,

    /// what happens when a topic handler is registered for a type that has a handler already
    pub duplicate_topic_handlers: DuplicateHandlerPolicy,
}

impl RouterConfig {
    pub fn new(name: impl Into<String>) -> RouterConfig {
        RouterConfig {
            name: name.into(),
            default_send_timeout: Duration::from_secs(3600),
            serializer: Default::default(),
            max_message_size: 256 * 1024,
            duplicate_topic_handlers: Default::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            bail!("router name must not be empty");
        }
        if self.default_send_timeout < MIN_REMOTE_TIMEOUT {
            bail!("default send timeout {:?} is below the minimum of {:?}", self.default_send_timeout, MIN_REMOTE_TIMEOUT);
        }
        if self.max_message_size == 0 {
            bail!("max message size must be positive");
        }
        Ok(())
    }
}
