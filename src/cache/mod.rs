mod factory_registry;
pub mod publisher_cache;
pub mod receiver_cache;
pub mod sender_cache;
pub mod subscriber_cache;
