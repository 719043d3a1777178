//! Reverse-order teardown of one target
//!
//! Deletion walks the creation order backwards (see
//! `ResourceKind::teardown_priority`): edge first so the load balancer is
//! released, then the service so its interfaces drain, then the load
//! balancer stack, the cluster, the network, and finally logs, roles, and
//! the repository. Every step is idempotent; a failed step is logged and
//! the walk continues so repeated runs converge.

use super::deploy::DeployOptions;
use crate::aws::{
    AlbClient, AppRunnerClient, AwsContext, EcrClient, EcsClient, EdgeClient, IamClient,
    LogsClient, NetworkClient, ScalingClient,
};
use crate::plan::{DeploymentPlan, Topology};
use anyhow::Result;
use tracing::{info, instrument, warn};

macro_rules! attempt {
    ($step:expr, $what:literal) => {
        if let Err(e) = $step.await {
            warn!(error = ?e, concat!("Failed to remove ", $what, ", continuing"));
        }
    };
}

/// Destroy everything the plan would have created.
#[instrument(skip_all, fields(
    app = %plan.config.app_name,
    environment = %plan.config.environment,
    region = %plan.config.region,
))]
pub async fn run_destroy(plan: &DeploymentPlan, options: &DeployOptions) -> Result<()> {
    let config = &plan.config;
    let names = &plan.names;
    info!("Destroying deployment");

    let aws = AwsContext::with_profile(&config.region, options.aws_profile.as_deref()).await;

    match plan.topology {
        Topology::AppRunner => {
            let apprunner = AppRunnerClient::from_context(&aws);
            attempt!(
                apprunner.delete_service(&names.apprunner_service()),
                "managed service"
            );

            let iam = IamClient::from_context(&aws);
            attempt!(iam.delete_role(&names.apprunner_access_role()), "access role");
        }
        Topology::Fargate | Topology::FargateCdn => {
            if plan.topology.has_edge() {
                let edge = EdgeClient::from_context(&aws);
                attempt!(edge.delete_distribution(names), "edge distribution");
                attempt!(edge.delete_function(&names.edge_function()), "edge function");
            }

            let scaling = ScalingClient::from_context(&aws);
            attempt!(
                scaling.remove_service_scaling(
                    &names.cluster(),
                    &names.service(),
                    &names.scaling_policy(),
                ),
                "autoscaling"
            );

            let ecs = EcsClient::from_context(&aws);
            attempt!(
                ecs.delete_service(&names.cluster(), &names.service()),
                "service"
            );

            let alb = AlbClient::from_context(&aws);
            attempt!(alb.delete_load_balancer(&names.load_balancer()), "load balancer");
            attempt!(alb.delete_target_group(&names.target_group()), "target group");

            attempt!(ecs.delete_cluster(&names.cluster()), "cluster");
            attempt!(ecs.deregister_task_family(&names.task_family()), "task definitions");

            let network = NetworkClient::from_context(&aws);
            if let Some(vpc_id) = network
                .find_tagged_vpc(&config.app_name, &config.environment)
                .await?
            {
                for sg_name in [names.alb_security_group(), names.service_security_group()] {
                    match network.find_security_group(&sg_name, &vpc_id).await {
                        Ok(Some(sg_id)) => {
                            attempt!(network.delete_security_group(&sg_id), "security group");
                        }
                        Ok(None) => {}
                        Err(e) => warn!(error = ?e, "Failed to look up security group"),
                    }
                }
                attempt!(network.delete_network(&vpc_id), "network");
            }

            let logs = LogsClient::from_context(&aws);
            attempt!(logs.delete_log_group(&names.log_group()), "log group");

            let iam = IamClient::from_context(&aws);
            attempt!(iam.delete_role(&names.execution_role()), "execution role");
        }
    }

    let ecr = EcrClient::from_context(&aws);
    attempt!(ecr.delete_repository(&config.repository_name), "repository");

    info!("Destroy complete");
    Ok(())
}
