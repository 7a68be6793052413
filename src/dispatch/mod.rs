pub mod request_dispatcher;
pub mod request_task;
pub mod topic_dispatcher;
