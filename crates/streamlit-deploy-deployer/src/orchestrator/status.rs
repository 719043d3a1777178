//! Live status of a planned deployment
//!
//! Describes each resource the plan names and prints its current state as a
//! table or JSON. Useful after `deploy` and as a sanity check before
//! `destroy`.

use super::deploy::DeployOptions;
use crate::aws::{
    AlbClient, AppRunnerClient, AwsContext, EcrClient, EcsClient, EdgeClient, IamClient,
    NetworkClient,
};
use crate::plan::{DeploymentPlan, Topology};
use anyhow::Result;
use serde::Serialize;
use streamlit_deploy_common::ResourceKind;
use tracing::instrument;

/// Output format for the status report
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StatusFormat {
    Table,
    Json,
}

impl std::fmt::Display for StatusFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusFormat::Table => write!(f, "table"),
            StatusFormat::Json => write!(f, "json"),
        }
    }
}

/// State of one planned resource
#[derive(Debug, Serialize)]
pub struct ResourceStatus {
    pub kind: &'static str,
    pub name: String,
    pub state: String,
}

/// Describe every resource the plan names and print the report.
#[instrument(skip_all, fields(
    app = %plan.config.app_name,
    environment = %plan.config.environment,
    region = %plan.config.region,
))]
pub async fn run_status(
    plan: &DeploymentPlan,
    options: &DeployOptions,
    format: StatusFormat,
) -> Result<()> {
    let statuses = collect_statuses(plan, options).await?;

    match format {
        StatusFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&statuses)?);
        }
        StatusFormat::Table => {
            println!("{:<16} {:<42} {:<20}", "KIND", "NAME", "STATE");
            println!("{}", "-".repeat(78));
            for status in &statuses {
                println!(
                    "{:<16} {:<42} {:<20}",
                    status.kind, status.name, status.state
                );
            }
        }
    }
    Ok(())
}

async fn collect_statuses(
    plan: &DeploymentPlan,
    options: &DeployOptions,
) -> Result<Vec<ResourceStatus>> {
    let config = &plan.config;
    let names = &plan.names;
    let aws = AwsContext::with_profile(&config.region, options.aws_profile.as_deref()).await;

    let mut statuses = Vec::new();

    let ecr = EcrClient::from_context(&aws);
    statuses.push(ResourceStatus {
        kind: ResourceKind::EcrRepository.name(),
        name: config.repository_name.clone(),
        state: present_or_missing(ecr.repository_exists(&config.repository_name).await),
    });

    match plan.topology {
        Topology::AppRunner => {
            let apprunner = AppRunnerClient::from_context(&aws);
            let state = apprunner
                .service_status(&names.apprunner_service())
                .await?
                .unwrap_or_else(missing);
            statuses.push(ResourceStatus {
                kind: ResourceKind::AppRunnerService.name(),
                name: names.apprunner_service(),
                state,
            });

            let iam = IamClient::from_context(&aws);
            statuses.push(ResourceStatus {
                kind: ResourceKind::IamRole.name(),
                name: names.apprunner_access_role(),
                state: present_or_missing(iam.role_exists(&names.apprunner_access_role()).await),
            });
        }
        Topology::Fargate | Topology::FargateCdn => {
            let network = NetworkClient::from_context(&aws);
            let vpc = network
                .find_tagged_vpc(&config.app_name, &config.environment)
                .await?;
            statuses.push(ResourceStatus {
                kind: ResourceKind::Vpc.name(),
                name: names.vpc(),
                state: vpc.clone().unwrap_or_else(missing),
            });

            let ecs = EcsClient::from_context(&aws);
            let state = match ecs.service_counts(&names.cluster(), &names.service()).await? {
                Some((running, desired)) => format!("{running}/{desired} running"),
                None => missing(),
            };
            statuses.push(ResourceStatus {
                kind: ResourceKind::EcsService.name(),
                name: names.service(),
                state,
            });

            let alb = AlbClient::from_context(&aws);
            let state = match alb.find_load_balancer(&names.load_balancer()).await? {
                Some(lb) => lb.dns_name,
                None => missing(),
            };
            statuses.push(ResourceStatus {
                kind: ResourceKind::LoadBalancer.name(),
                name: names.load_balancer(),
                state,
            });

            let iam = IamClient::from_context(&aws);
            statuses.push(ResourceStatus {
                kind: ResourceKind::IamRole.name(),
                name: names.execution_role(),
                state: present_or_missing(iam.role_exists(&names.execution_role()).await),
            });

            if plan.topology.has_edge() {
                let edge = EdgeClient::from_context(&aws);
                let state = edge
                    .distribution_status(names)
                    .await?
                    .unwrap_or_else(missing);
                statuses.push(ResourceStatus {
                    kind: ResourceKind::Distribution.name(),
                    name: names.distribution_comment(),
                    state,
                });
            }
        }
    }

    Ok(statuses)
}

fn present_or_missing(present: bool) -> String {
    if present {
        "present".to_string()
    } else {
        missing()
    }
}

fn missing() -> String {
    "absent".to_string()
}
