//! AWS resource kinds and teardown ordering
//!
//! Provides consistent teardown priority across the destroy path. Resources
//! must be removed in dependency order to avoid failures.

/// Types of AWS resources managed by streamlit-deploy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Edge distribution (must stop referencing the load balancer first)
    Distribution,
    /// Edge request-transform function (detached once the distribution is gone)
    EdgeFunction,
    /// Managed serverless hosting service
    AppRunnerService,
    /// Scaling policy and scalable target registration
    ScalingPolicy,
    /// Orchestrated service (must drain before the load balancer goes away)
    EcsService,
    /// Listener gate rule and redirect default
    ListenerRule,
    /// Load balancer (holds the listener)
    LoadBalancer,
    /// Target group (deletable only once no listener forwards to it)
    TargetGroup,
    /// Orchestration cluster (deletable only once services are gone)
    EcsCluster,
    /// Task definition family
    TaskDefinition,
    /// Security group (deletable only once attached interfaces are released)
    SecurityGroup,
    /// Dedicated network
    Vpc,
    /// Task log group
    LogGroup,
    /// Execution / access roles
    IamRole,
    /// Image repository
    EcrRepository,
}

impl ResourceKind {
    /// Get teardown priority (lower number = removed first).
    ///
    /// The ordering mirrors creation in reverse: the edge layer releases the
    /// load balancer, the service drains before the load balancer and target
    /// group go away, the cluster empties before deletion, and security
    /// groups wait for the interfaces of terminated tasks.
    pub fn teardown_priority(self) -> u8 {
        match self {
            ResourceKind::Distribution => 0,
            ResourceKind::EdgeFunction => 1,
            ResourceKind::AppRunnerService => 1,
            ResourceKind::ScalingPolicy => 2,
            ResourceKind::EcsService => 3,
            ResourceKind::ListenerRule => 4,
            ResourceKind::LoadBalancer => 5,
            ResourceKind::TargetGroup => 6,
            ResourceKind::EcsCluster => 7,
            ResourceKind::TaskDefinition => 7,
            ResourceKind::SecurityGroup => 8,
            ResourceKind::Vpc => 9,
            ResourceKind::LogGroup => 10,
            ResourceKind::IamRole => 10,
            ResourceKind::EcrRepository => 11,
        }
    }

    /// Short name used in status reports and logs
    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::Distribution => "distribution",
            ResourceKind::EdgeFunction => "edge-function",
            ResourceKind::AppRunnerService => "apprunner-service",
            ResourceKind::ScalingPolicy => "scaling-policy",
            ResourceKind::EcsService => "service",
            ResourceKind::ListenerRule => "listener-rule",
            ResourceKind::LoadBalancer => "load-balancer",
            ResourceKind::TargetGroup => "target-group",
            ResourceKind::EcsCluster => "cluster",
            ResourceKind::TaskDefinition => "task-definition",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::Vpc => "vpc",
            ResourceKind::LogGroup => "log-group",
            ResourceKind::IamRole => "iam-role",
            ResourceKind::EcrRepository => "repository",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_drains_before_load_balancer_and_cluster() {
        assert!(
            ResourceKind::EcsService.teardown_priority()
                < ResourceKind::LoadBalancer.teardown_priority()
        );
        assert!(
            ResourceKind::EcsService.teardown_priority()
                < ResourceKind::EcsCluster.teardown_priority()
        );
    }

    #[test]
    fn edge_releases_load_balancer_first() {
        assert!(
            ResourceKind::Distribution.teardown_priority()
                < ResourceKind::LoadBalancer.teardown_priority()
        );
    }

    #[test]
    fn security_groups_wait_for_compute() {
        assert!(
            ResourceKind::SecurityGroup.teardown_priority()
                > ResourceKind::EcsService.teardown_priority()
        );
        assert!(
            ResourceKind::SecurityGroup.teardown_priority()
                < ResourceKind::Vpc.teardown_priority()
        );
    }

    #[test]
    fn target_group_outlives_listener() {
        assert!(
            ResourceKind::ListenerRule.teardown_priority()
                < ResourceKind::TargetGroup.teardown_priority()
        );
    }
}
