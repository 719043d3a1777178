//! Pure deployment planning
//!
//! A [`DeploymentPlan`] is computed once per target from the immutable
//! configuration: every resource name, the traffic gate, and the chosen
//! topology. Nothing here talks to the network, which is what makes
//! `--dry-run` and the planning tests possible.

use clap::ValueEnum;
use std::fmt;
use streamlit_deploy_common::{DeploymentConfig, ResourceNames, TrafficGate};

/// Which hosting topology to deploy
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Topology {
    /// Managed serverless hosting; the provider owns ingress and scaling
    AppRunner,
    /// Orchestrated containers behind a public load balancer
    Fargate,
    /// Orchestrated containers with the edge distribution and traffic gate
    FargateCdn,
}

impl Topology {
    /// Whether this topology declares a load balancer
    pub fn has_load_balancer(self) -> bool {
        matches!(self, Topology::Fargate | Topology::FargateCdn)
    }

    /// Whether this topology fronts the load balancer with the edge layer
    pub fn has_edge(self) -> bool {
        matches!(self, Topology::FargateCdn)
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::AppRunner => write!(f, "app-runner"),
            Topology::Fargate => write!(f, "fargate"),
            Topology::FargateCdn => write!(f, "fargate-cdn"),
        }
    }
}

/// Everything about a deployment target that is known before the first AWS
/// call.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub config: DeploymentConfig,
    pub names: ResourceNames,
    pub gate: TrafficGate,
    pub topology: Topology,
}

impl DeploymentPlan {
    pub fn new(config: DeploymentConfig, topology: Topology) -> Self {
        let names = ResourceNames::new(&config.app_name, &config.environment);
        let gate = TrafficGate::for_app(&config.app_name);
        Self {
            config,
            names,
            gate,
            topology,
        }
    }

    /// Human-readable rendering for `--dry-run`
    pub fn render(&self) -> String {
        let mut out = String::new();
        let c = &self.config;
        out.push_str(&format!(
            "Deployment plan for {} ({}) in {}\n",
            c.app_name, c.environment, c.region
        ));
        out.push_str(&format!("  topology:       {}\n", self.topology));
        out.push_str(&format!("  repository:     {}\n", c.repository_name));
        out.push_str(&format!(
            "  image tags:     {}\n",
            c.push_tags().join(", ")
        ));
        out.push_str(&format!("  platform:       {}\n", c.platform));
        out.push_str(&format!("  container port: {}\n", c.port));

        match self.topology {
            Topology::AppRunner => {
                out.push_str(&format!(
                    "  service:        {}\n",
                    self.names.apprunner_service()
                ));
                out.push_str(&format!(
                    "  access role:    {}\n",
                    self.names.apprunner_access_role()
                ));
            }
            Topology::Fargate | Topology::FargateCdn => {
                out.push_str(&format!("  vpc:            {}\n", self.names.vpc()));
                out.push_str(&format!("  cluster:        {}\n", self.names.cluster()));
                out.push_str(&format!("  service:        {}\n", self.names.service()));
                out.push_str(&format!(
                    "  load balancer:  {}\n",
                    self.names.load_balancer()
                ));
                out.push_str(&format!("  log group:      {}\n", self.names.log_group()));
            }
        }

        if self.topology.has_edge() {
            out.push_str(&format!(
                "  distribution:   {}\n",
                self.names.distribution_comment()
            ));
            out.push_str(&format!(
                "  gate header:    {}: {}\n",
                self.gate.header_name(),
                self.gate.header_value()
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamlit_deploy_common::Platform;

    fn demo_config() -> DeploymentConfig {
        DeploymentConfig {
            region: "eu-west-1".to_string(),
            environment: "dev".to_string(),
            app_name: "demo".to_string(),
            repository_name: "demo-repo".to_string(),
            image_version: "1.2.0".to_string(),
            platform: Platform::Arm64,
            port: 8501,
        }
    }

    #[test]
    fn plan_derives_gate_from_app_name() {
        let plan = DeploymentPlan::new(demo_config(), Topology::FargateCdn);
        assert_eq!(plan.gate.header_name(), "X-Verify-Origin");
        assert_eq!(
            plan.gate.header_value(),
            "demo-StreamlitCloudFrontDistribution"
        );
    }

    #[test]
    fn topology_feature_flags() {
        assert!(!Topology::AppRunner.has_load_balancer());
        assert!(!Topology::AppRunner.has_edge());
        assert!(Topology::Fargate.has_load_balancer());
        assert!(!Topology::Fargate.has_edge());
        assert!(Topology::FargateCdn.has_load_balancer());
        assert!(Topology::FargateCdn.has_edge());
    }

    #[test]
    fn pinned_version_plans_two_pushes_and_arm_platform() {
        let plan = DeploymentPlan::new(demo_config(), Topology::FargateCdn);
        assert_eq!(plan.config.push_tags(), vec!["1.2.0", "latest"]);
        assert_eq!(plan.config.platform.cpu_architecture(), "ARM64");
    }

    #[test]
    fn render_names_the_gate_only_for_edge_topologies() {
        let edge = DeploymentPlan::new(demo_config(), Topology::FargateCdn).render();
        assert!(edge.contains("X-Verify-Origin"));

        let plain = DeploymentPlan::new(demo_config(), Topology::Fargate).render();
        assert!(!plain.contains("X-Verify-Origin"));
    }
}
