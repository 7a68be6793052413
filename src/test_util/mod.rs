//! This module contains utilities that are useful for testing code based on the message router.
//!  They are used for testing the router itself, but they are also exported for application
//!  testing: the loopback transport allows running senders, receivers, publishers and subscribers
//!  in a single process without any network.

pub mod loopback;
pub mod message;
#[cfg(test)] pub(crate) mod stub;
