pub mod request_router;
pub mod routing;
pub mod topic_router;
