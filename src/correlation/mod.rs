pub mod pending_requests;
pub mod remote_task;
pub mod sender;
