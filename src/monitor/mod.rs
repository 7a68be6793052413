pub mod connection_monitor;
pub mod monitor;
pub mod monitor_cache;
