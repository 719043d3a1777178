//! Phased deployment of one target
//!
//! Phases run in dependency order: account validation, registry and image,
//! then either the managed hosting service or the orchestrated stack, with
//! the edge layer wired last so the gate rule can reference the
//! distribution's domain.

use super::DeployOutputs;
use crate::aws::{
    get_current_account_id, AlbClient, AppRunnerClient, AwsContext, EcrClient, EcsClient,
    EdgeClient, IamClient, ImagePublisher, LogsClient, NetworkClient, RepositoryRef,
    ScalingClient,
};
use crate::aws::logs::log_group_arn;
use crate::plan::{DeploymentPlan, Topology};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, instrument};

/// Knobs that come from the CLI rather than the environment
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Directory containing the Dockerfile
    pub build_context: PathBuf,
    /// Skip the image build/push (the requested tags must already exist)
    pub skip_push: bool,
    /// AWS profile overriding default credential resolution
    pub aws_profile: Option<String>,
}

/// Deploy one target end to end and return its informational outputs.
#[instrument(skip_all, fields(
    app = %plan.config.app_name,
    environment = %plan.config.environment,
    region = %plan.config.region,
    topology = %plan.topology,
))]
pub async fn run_deploy(plan: &DeploymentPlan, options: &DeployOptions) -> Result<DeployOutputs> {
    let config = &plan.config;
    info!("Starting deployment");

    // Phase 1: AWS setup
    let aws = AwsContext::with_profile(&config.region, options.aws_profile.as_deref()).await;
    let account_id = get_current_account_id(aws.sdk_config()).await?;

    // Phase 2: registry and image
    let ecr = EcrClient::from_context(&aws);
    let repository = ecr
        .ensure_repository(&config.repository_name, &config.app_name, &config.environment)
        .await?;

    if options.skip_push {
        info!("Skipping image build and push");
    } else {
        let auth = ecr.authorization().await?;
        ImagePublisher::new(&options.build_context)
            .publish(&repository.uri, &config.push_tags(), config.platform, &auth)
            .await?;
    }
    let image_uri = format!("{}:{}", repository.uri, config.image_version);

    // Phase 3+: the chosen hosting topology
    let service_url = match plan.topology {
        Topology::AppRunner => deploy_app_runner(plan, &aws, &image_uri).await?,
        Topology::Fargate | Topology::FargateCdn => {
            deploy_fargate(plan, &aws, &account_id, &repository, &image_uri).await?
        }
    };

    info!(url = %service_url, "Deployment complete");
    Ok(DeployOutputs {
        repository_arn: repository.arn,
        repository_name: repository.name,
        service_url,
    })
}

/// Variant A: managed serverless hosting. The provider owns ingress,
/// scaling, and health checking.
async fn deploy_app_runner(
    plan: &DeploymentPlan,
    aws: &AwsContext,
    image_uri: &str,
) -> Result<String> {
    let config = &plan.config;

    let iam = IamClient::from_context(aws);
    let access_role_arn = iam
        .ensure_apprunner_access_role(
            &plan.names.apprunner_access_role(),
            &config.app_name,
            &config.environment,
        )
        .await?;

    let apprunner = AppRunnerClient::from_context(aws);
    let service = apprunner
        .ensure_service(
            &plan.names.apprunner_service(),
            image_uri,
            config.port,
            &access_role_arn,
            &config.app_name,
            &config.environment,
        )
        .await?;
    apprunner.wait_for_running(&service.arn).await?;

    Ok(format!("https://{}", service.url))
}

/// Variant B: the orchestrated stack - network, roles, logs, load balancer,
/// cluster and service, autoscaling, and (for the edge topology) the
/// distribution plus the listener gate.
async fn deploy_fargate(
    plan: &DeploymentPlan,
    aws: &AwsContext,
    account_id: &crate::aws::AccountId,
    repository: &RepositoryRef,
    image_uri: &str,
) -> Result<String> {
    let config = &plan.config;
    let names = &plan.names;
    let app = &config.app_name;
    let environment = &config.environment;

    // Network
    let network = NetworkClient::from_context(aws);
    let network_ref = network.ensure_network(names, app, environment).await?;
    let security_groups = network
        .ensure_security_groups(names, &network_ref.vpc_id, config.port, app, environment)
        .await?;

    // Logs and execution role
    let logs = LogsClient::from_context(aws);
    logs.ensure_log_group(&names.log_group(), app, environment)
        .await?;

    let iam = IamClient::from_context(aws);
    let execution_role_arn = iam
        .ensure_task_execution_role(
            &names.execution_role(),
            &repository.arn,
            &log_group_arn(account_id, &config.region, &names.log_group()),
            app,
            environment,
        )
        .await?;

    // Load balancer, target group, listener
    let alb = AlbClient::from_context(aws);
    let load_balancer = alb
        .ensure_load_balancer(
            &names.load_balancer(),
            &network_ref.subnet_ids,
            &security_groups.alb_sg_id,
            app,
            environment,
        )
        .await?;
    let target_group_arn = alb
        .ensure_target_group(&names.target_group(), &network_ref.vpc_id, app, environment)
        .await?;
    let listener_arn = alb
        .ensure_listener(&load_balancer.arn, &target_group_arn, app, environment)
        .await?;

    // Cluster, task definition, service
    let ecs = EcsClient::from_context(aws);
    let cluster_arn = ecs.ensure_cluster(&names.cluster(), app, environment).await?;
    let task_definition_arn = ecs
        .register_task_definition(
            names,
            image_uri,
            config.port,
            config.platform,
            &execution_role_arn,
            &config.region,
            app,
            environment,
        )
        .await?;
    ecs.create_or_update_service(
        &cluster_arn,
        names,
        &task_definition_arn,
        &network_ref.subnet_ids,
        &security_groups.service_sg_id,
        &target_group_arn,
        config.port,
        app,
        environment,
    )
    .await?;

    // Autoscaling on the service's task count
    let scaling = ScalingClient::from_context(aws);
    scaling
        .configure_service_scaling(&names.cluster(), &names.service(), &names.scaling_policy())
        .await?;

    ecs.wait_for_service_stable(&names.cluster(), &names.service())
        .await?;

    if !plan.topology.has_edge() {
        return Ok(format!("http://{}", load_balancer.dns_name));
    }

    // Edge layer: distribution first (its domain feeds the redirect), then
    // the listener gate, then the long rollout wait
    let edge = EdgeClient::from_context(aws);
    let function_arn = edge
        .ensure_preflight_function(&names.edge_function())
        .await?;
    let distribution = edge
        .ensure_distribution(
            names,
            &load_balancer.dns_name,
            &plan.gate,
            &function_arn,
            app,
            environment,
        )
        .await?;

    alb.install_gate(
        &listener_arn,
        &plan.gate,
        &target_group_arn,
        &distribution.domain_name,
    )
    .await?;

    edge.wait_for_deployed(&distribution.id)
        .await
        .context("Edge distribution did not finish rolling out")?;

    Ok(format!("https://{}", distribution.domain_name))
}
