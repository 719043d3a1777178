//! Deterministic resource naming
//!
//! All resource names are derived from the (app, environment) pair, so a
//! deployment can be re-run, inspected, or destroyed without any recorded
//! state: the names are the state.

/// Load balancer and target group names are capped at 32 characters by the API
const ELB_NAME_LIMIT: usize = 32;

/// IAM role names are capped at 64 characters
const IAM_NAME_LIMIT: usize = 64;

/// Resource name templates for one deployment target.
#[derive(Debug, Clone)]
pub struct ResourceNames {
    prefix: String,
}

impl ResourceNames {
    pub fn new(app_name: &str, environment: &str) -> Self {
        Self {
            prefix: format!("{app_name}-{environment}"),
        }
    }

    fn qualified(&self, suffix: &str) -> String {
        format!("{}-{}", self.prefix, suffix)
    }

    /// Truncate to an API limit, trimming a trailing '-' left by the cut
    fn capped(&self, suffix: &str, limit: usize) -> String {
        let name = self.qualified(suffix);
        if name.len() <= limit {
            name
        } else {
            name[..limit].trim_end_matches('-').to_string()
        }
    }

    pub fn vpc(&self) -> String {
        self.qualified("vpc")
    }

    pub fn alb_security_group(&self) -> String {
        self.qualified("alb-sg")
    }

    pub fn service_security_group(&self) -> String {
        self.qualified("service-sg")
    }

    pub fn load_balancer(&self) -> String {
        self.capped("alb", ELB_NAME_LIMIT)
    }

    pub fn target_group(&self) -> String {
        self.capped("tg", ELB_NAME_LIMIT)
    }

    pub fn cluster(&self) -> String {
        self.qualified("cluster")
    }

    pub fn service(&self) -> String {
        self.qualified("service")
    }

    pub fn task_family(&self) -> String {
        self.qualified("task")
    }

    /// Container name inside the task definition; the service's load balancer
    /// binding references it
    pub fn container(&self) -> String {
        self.prefix.clone()
    }

    pub fn log_group(&self) -> String {
        format!("/streamlit-deploy/{}", self.prefix)
    }

    pub fn execution_role(&self) -> String {
        self.capped("execution-role", IAM_NAME_LIMIT)
    }

    pub fn apprunner_access_role(&self) -> String {
        self.capped("apprunner-ecr-role", IAM_NAME_LIMIT)
    }

    pub fn apprunner_service(&self) -> String {
        self.qualified("service")
    }

    pub fn scaling_policy(&self) -> String {
        self.qualified("cpu-scaling")
    }

    pub fn edge_function(&self) -> String {
        self.qualified("preflight")
    }

    /// Comment on the edge distribution; also how an existing distribution is
    /// found again, since distribution ids are assigned by the provider
    pub fn distribution_comment(&self) -> String {
        self.qualified("edge")
    }

    /// Caller reference for distribution creation; deterministic so a re-run
    /// of the same deployment does not create a second distribution
    pub fn distribution_caller_reference(&self) -> String {
        format!("streamlit-deploy-{}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_derive_from_app_and_environment() {
        let names = ResourceNames::new("demo", "dev");
        assert_eq!(names.vpc(), "demo-dev-vpc");
        assert_eq!(names.cluster(), "demo-dev-cluster");
        assert_eq!(names.load_balancer(), "demo-dev-alb");
        assert_eq!(names.log_group(), "/streamlit-deploy/demo-dev");
        assert_eq!(names.execution_role(), "demo-dev-execution-role");
    }

    #[test]
    fn elb_names_respect_api_limit() {
        let names = ResourceNames::new("a-rather-long-application-name", "production");
        let lb = names.load_balancer();
        let tg = names.target_group();
        assert!(lb.len() <= ELB_NAME_LIMIT, "lb name too long: {lb}");
        assert!(tg.len() <= ELB_NAME_LIMIT, "tg name too long: {tg}");
        assert!(!lb.ends_with('-'));
    }

    #[test]
    fn caller_reference_is_deterministic() {
        let a = ResourceNames::new("demo", "dev");
        let b = ResourceNames::new("demo", "dev");
        assert_eq!(
            a.distribution_caller_reference(),
            b.distribution_caller_reference()
        );
    }
}
