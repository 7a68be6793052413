use serde::{Deserialize, Serialize};


#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestRequest {
    pub value: i64,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestResponse {
    pub value: i64,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestEvent {
    pub value: i64,
}

/// has the same serialized form as [TestEvent], but is a different type
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct SimilarTestEvent {
    pub value: i64,
}
