//! Origin-verification header shared by the edge layer and the load balancer
//!
//! The edge distribution injects this header on every request toward the
//! origin, and the load balancer only forwards requests that carry it with
//! the exact expected value. Both declaration sites MUST receive the same
//! `TrafficGate` value; constructing the header string anywhere else risks
//! the two sides silently diverging.

/// Header name checked by the load balancer's forward rule
pub const GATE_HEADER_NAME: &str = "X-Verify-Origin";

/// Fixed suffix appended to the application name to form the header value
const GATE_VALUE_SUFFIX: &str = "-StreamlitCloudFrontDistribution";

/// The shared secret carried in [`GATE_HEADER_NAME`].
///
/// This is a capability check, not an authentication protocol: the value is
/// static, embedded in infrastructure configuration, and rotates only via
/// redeployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficGate {
    value: String,
}

impl TrafficGate {
    /// Derive the gate for an application. This is the single construction
    /// site for the header value.
    pub fn for_app(app_name: &str) -> Self {
        Self {
            value: format!("{app_name}{GATE_VALUE_SUFFIX}"),
        }
    }

    pub fn header_name(&self) -> &'static str {
        GATE_HEADER_NAME
    }

    pub fn header_value(&self) -> &str {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_value_is_app_name_plus_fixed_suffix() {
        let gate = TrafficGate::for_app("demo");
        assert_eq!(gate.header_name(), "X-Verify-Origin");
        assert_eq!(gate.header_value(), "demo-StreamlitCloudFrontDistribution");
    }

    #[test]
    fn gates_for_same_app_agree() {
        // Both declaration sites derive from the same constructor, so two
        // gates built from the same app name must compare equal.
        assert_eq!(TrafficGate::for_app("demo"), TrafficGate::for_app("demo"));
        assert_ne!(TrafficGate::for_app("demo"), TrafficGate::for_app("other"));
    }
}
