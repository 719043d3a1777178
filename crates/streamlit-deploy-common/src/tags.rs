//! AWS resource tag constants for streamlit-deploy
//!
//! Every resource created by the deployer carries these standard tags so
//! deployments can be discovered, inspected, and torn down safely.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `streamlit-deploy:tool` | Static identifier ("streamlit-deploy") |
//! | `streamlit-deploy:app` | Application name |
//! | `streamlit-deploy:environment` | Environment name (dev/staging/prod/...) |
//! | `streamlit-deploy:created-at` | RFC 3339 creation timestamp |

/// Tag key for tool identification - all streamlit-deploy resources have this
pub const TAG_TOOL: &str = "streamlit-deploy:tool";

/// Tag value for tool identification
pub const TAG_TOOL_VALUE: &str = "streamlit-deploy";

/// Tag key for the application the resource belongs to
pub const TAG_APP: &str = "streamlit-deploy:app";

/// Tag key for the deployment environment
pub const TAG_ENVIRONMENT: &str = "streamlit-deploy:environment";

/// Tag key for creation timestamp (RFC 3339 format)
pub const TAG_CREATED_AT: &str = "streamlit-deploy:created-at";

/// Helper to format creation timestamp for tags
pub fn format_created_at(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339()
}

/// Helper to parse creation timestamp from tags
pub fn parse_created_at(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn format_parse_roundtrip() {
        let now = Utc::now();
        let formatted = format_created_at(now);
        let parsed = parse_created_at(&formatted).unwrap();

        let diff = (now - parsed).num_seconds().abs();
        assert!(diff <= 1, "roundtrip diff {} > 1 second", diff);
    }

    #[test]
    fn parse_invalid() {
        assert!(parse_created_at("not a timestamp").is_none());
        assert!(parse_created_at("").is_none());
    }
}
