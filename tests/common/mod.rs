use dynamo_sessions::SessionManager;
use dynamo_sessions::store::SessionStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SECRET: &str = "integration-test-secret";

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub(crate) struct TestUser {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TestSession {
    pub user: TestUser,
    pub preferences: TestPreferences,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub(crate) struct TestPreferences {
    pub theme: String,
    pub language: String,
}

pub fn create_test_session() -> TestSession {
    TestSession {
        user: TestUser {
            id: 1,
            name: "Test User".to_string(),
        },
        preferences: TestPreferences {
            theme: "dark".to_string(),
            language: "en".to_string(),
        },
    }
}

pub fn build_manager<S: SessionStore>(store: S) -> SessionManager<S> {
    SessionManager::new(Arc::new(store), SECRET)
}
