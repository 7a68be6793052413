pub mod address;
pub mod message;
pub mod package;
pub mod serializer;
