//! End-to-end planning scenarios, no AWS access needed

use streamlit_deploy_common::config::{
    EnvironmentSettings, ENV_APP_NAME, ENV_DEPLOY_REGIONS, ENV_ENVIRONMENTS, ENV_IMAGE_VERSION,
    ENV_PLATFORMS, ENV_PORT, ENV_REPOSITORY_NAME,
};
use streamlit_deploy_deployer::plan::{DeploymentPlan, Topology};

fn demo_lookup(key: &str) -> Option<String> {
    match key {
        ENV_DEPLOY_REGIONS => Some("eu-west-1".to_string()),
        ENV_ENVIRONMENTS => Some("dev".to_string()),
        ENV_REPOSITORY_NAME => Some("demo-repo".to_string()),
        ENV_APP_NAME => Some("demo".to_string()),
        ENV_IMAGE_VERSION => Some("1.2.0".to_string()),
        ENV_PLATFORMS => Some("LINUX_ARM64".to_string()),
        ENV_PORT => Some("8501".to_string()),
        _ => None,
    }
}

/// A pinned arm64 deployment of "demo", end to end through planning
#[test]
fn pinned_arm64_deployment_scenario() {
    let settings = EnvironmentSettings::resolve(demo_lookup).unwrap();
    let targets = settings.targets();
    assert_eq!(targets.len(), 1);

    let plan = DeploymentPlan::new(targets[0].clone(), Topology::FargateCdn);

    // Registry receives exactly two tagged pushes
    assert_eq!(plan.config.push_tags(), vec!["1.2.0", "latest"]);

    // Runtime platform resolves to ARM64/Linux
    assert_eq!(plan.config.platform.cpu_architecture(), "ARM64");
    assert_eq!(plan.config.platform.docker_platform(), "linux/arm64");

    // Both gate declaration sites will receive this exact value
    assert_eq!(
        plan.gate.header_value(),
        "demo-StreamlitCloudFrontDistribution"
    );

    // Resource names template from (app, environment)
    assert_eq!(plan.names.cluster(), "demo-dev-cluster");
    assert_eq!(plan.names.load_balancer(), "demo-dev-alb");
    assert_eq!(plan.names.distribution_comment(), "demo-dev-edge");
}

/// When the version is the sentinel, only one push is planned
#[test]
fn latest_version_plans_single_push() {
    let lookup = |key: &str| match key {
        ENV_IMAGE_VERSION => Some("latest".to_string()),
        other => demo_lookup(other),
    };
    let settings = EnvironmentSettings::resolve(lookup).unwrap();
    let plan = DeploymentPlan::new(settings.targets()[0].clone(), Topology::FargateCdn);
    assert_eq!(plan.config.push_tags(), vec!["latest"]);
}

/// Multi-region, multi-environment settings expand to one plan per pair
#[test]
fn multi_target_expansion() {
    let lookup = |key: &str| match key {
        ENV_DEPLOY_REGIONS => Some("eu-west-1,us-east-1".to_string()),
        ENV_ENVIRONMENTS => Some("dev,prod".to_string()),
        other => demo_lookup(other),
    };
    let settings = EnvironmentSettings::resolve(lookup).unwrap();
    let plans: Vec<_> = settings
        .targets()
        .into_iter()
        .map(|t| DeploymentPlan::new(t, Topology::Fargate))
        .collect();

    assert_eq!(plans.len(), 4);
    // Same app in two environments gets distinct resource names
    assert_eq!(plans[0].names.service(), "demo-dev-service");
    assert_eq!(plans[1].names.service(), "demo-prod-service");
    // The gate derives from the app name alone, so it agrees across targets
    assert_eq!(
        plans[0].gate.header_value(),
        plans[3].gate.header_value()
    );
}
