pub mod callbacks;
pub mod connection;
pub mod directional;
pub mod transport;
