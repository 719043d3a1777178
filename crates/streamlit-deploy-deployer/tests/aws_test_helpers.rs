//! Shared helpers for AWS integration tests

use std::time::{SystemTime, UNIX_EPOCH};

/// Region used by integration tests, overridable via STREAMLIT_DEPLOY_TEST_REGION
pub fn get_test_region() -> String {
    std::env::var("STREAMLIT_DEPLOY_TEST_REGION").unwrap_or_else(|_| "eu-west-1".to_string())
}

/// Unique suffix so concurrent test runs don't collide on resource names
pub fn test_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("it{nanos:x}")
}
