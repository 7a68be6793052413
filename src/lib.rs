pub mod cache;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod messaging;
pub mod monitor;
pub mod router;
pub mod routing;
pub mod test_util;
