//! Orchestrated container topology: cluster, task definition, service
//!
//! The cluster and service are declared here; scheduling, placement, and
//! health management stay with the orchestrator itself.

use crate::aws::context::AwsContext;
use crate::aws::error::{classify_anyhow_error, ignore_not_found};
use crate::aws::tags::ecs_tags;
use crate::wait::{wait_for_resource, WaitConfig};
use anyhow::{Context, Result};
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, Compatibility, ContainerDefinition, CpuArchitecture,
    LaunchType, LoadBalancer, LogConfiguration, LogDriver, NetworkConfiguration,
    NetworkMode, OperatingSystemFamily, PortMapping, RuntimePlatform, TransportProtocol,
};
use aws_sdk_ecs::Client;
use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;
use streamlit_deploy_common::defaults::{
    SERVICE_DESIRED_COUNT, TASK_CPU_UNITS, TASK_MEMORY_MIB,
};
use streamlit_deploy_common::{Platform, ResourceNames};
use tracing::{debug, info, warn};

/// ECS client for the orchestrated topology
pub struct EcsClient {
    client: Client,
}

impl EcsClient {
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ecs_client(),
        }
    }

    /// Create the cluster. CreateCluster is idempotent by name.
    pub async fn ensure_cluster(
        &self,
        name: &str,
        app: &str,
        environment: &str,
    ) -> Result<String> {
        info!(cluster = %name, "Ensuring cluster");
        let response = self
            .client
            .create_cluster()
            .cluster_name(name)
            .set_tags(Some(ecs_tags(app, environment)))
            .send()
            .await
            .context("Failed to create cluster")?;

        response
            .cluster()
            .and_then(|c| c.cluster_arn())
            .map(|arn| arn.to_string())
            .context("No cluster ARN in response")
    }

    /// Register a new task definition revision for the deployment's image.
    pub async fn register_task_definition(
        &self,
        names: &ResourceNames,
        image_uri: &str,
        container_port: u16,
        platform: Platform,
        execution_role_arn: &str,
        region: &str,
        app: &str,
        environment: &str,
    ) -> Result<String> {
        info!(family = %names.task_family(), image = %image_uri, "Registering task definition");

        let port_mapping = PortMapping::builder()
            .container_port(i32::from(container_port))
            .protocol(TransportProtocol::Tcp)
            .build();

        let log_configuration = LogConfiguration::builder()
            .log_driver(LogDriver::Awslogs)
            .options("awslogs-group", names.log_group())
            .options("awslogs-region", region)
            .options("awslogs-stream-prefix", names.container())
            .build()
            .context("Failed to build log configuration")?;

        let container = ContainerDefinition::builder()
            .name(names.container())
            .image(image_uri)
            .essential(true)
            .port_mappings(port_mapping)
            .log_configuration(log_configuration)
            .build();

        let runtime_platform = RuntimePlatform::builder()
            .cpu_architecture(match platform {
                Platform::Amd64 => CpuArchitecture::X8664,
                Platform::Arm64 => CpuArchitecture::Arm64,
            })
            .operating_system_family(OperatingSystemFamily::Linux)
            .build();

        let response = self
            .client
            .register_task_definition()
            .family(names.task_family())
            .requires_compatibilities(Compatibility::Fargate)
            .network_mode(NetworkMode::Awsvpc)
            .cpu(TASK_CPU_UNITS)
            .memory(TASK_MEMORY_MIB)
            .execution_role_arn(execution_role_arn)
            .runtime_platform(runtime_platform)
            .container_definitions(container)
            .set_tags(Some(ecs_tags(app, environment)))
            .send()
            .await
            .context("Failed to register task definition")?;

        let arn = response
            .task_definition()
            .and_then(|td| td.task_definition_arn())
            .context("No task definition ARN in response")?
            .to_string();
        debug!(task_definition = %arn, "Task definition registered");
        Ok(arn)
    }

    /// Create the service bound to the target group, or point an existing
    /// service at the new task definition revision.
    ///
    /// Retries on the IAM propagation window where the orchestrator cannot
    /// yet assume the freshly created execution role.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_or_update_service(
        &self,
        cluster: &str,
        names: &ResourceNames,
        task_definition_arn: &str,
        subnet_ids: &[String],
        service_sg_id: &str,
        target_group_arn: &str,
        container_port: u16,
        app: &str,
        environment: &str,
    ) -> Result<String> {
        let service_name = names.service();

        if self.service_is_active(cluster, &service_name).await? {
            info!(service = %service_name, "Updating service to new task definition");
            let response = self
                .client
                .update_service()
                .cluster(cluster)
                .service(&service_name)
                .task_definition(task_definition_arn)
                .desired_count(SERVICE_DESIRED_COUNT)
                .send()
                .await
                .context("Failed to update service")?;
            return response
                .service()
                .and_then(|s| s.service_arn())
                .map(|arn| arn.to_string())
                .context("No service ARN in update response");
        }

        info!(service = %service_name, cluster = %cluster, "Creating service");

        let vpc_configuration = AwsVpcConfiguration::builder()
            .set_subnets(Some(subnet_ids.to_vec()))
            .security_groups(service_sg_id)
            // Public subnets without NAT: tasks need public addresses to
            // reach the registry and the logs endpoint
            .assign_public_ip(AssignPublicIp::Enabled)
            .build()
            .context("Failed to build VPC configuration")?;

        let load_balancer = LoadBalancer::builder()
            .target_group_arn(target_group_arn)
            .container_name(names.container())
            .container_port(i32::from(container_port))
            .build();

        let cluster_name = cluster.to_string();
        let create = || async {
            self.client
                .create_service()
                .cluster(&cluster_name)
                .service_name(&service_name)
                .task_definition(task_definition_arn)
                .desired_count(SERVICE_DESIRED_COUNT)
                .launch_type(LaunchType::Fargate)
                .load_balancers(load_balancer.clone())
                .network_configuration(
                    NetworkConfiguration::builder()
                        .awsvpc_configuration(vpc_configuration.clone())
                        .build(),
                )
                .set_tags(Some(ecs_tags(app, environment)))
                .send()
                .await
                .context("Failed to create service")
        };

        let response = create
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_secs(3))
                    .with_max_delay(Duration::from_secs(15))
                    .with_max_times(5),
            )
            .when(|e| classify_anyhow_error(e).is_retryable())
            .notify(|e, dur| {
                warn!(delay = ?dur, error = %e, "Service creation not ready, retrying...");
            })
            .await?;

        response
            .service()
            .and_then(|s| s.service_arn())
            .map(|arn| arn.to_string())
            .context("No service ARN in create response")
    }

    /// Wait until the service has a single deployment with all tasks running.
    pub async fn wait_for_service_stable(&self, cluster: &str, service: &str) -> Result<()> {
        let client = self.client.clone();
        let cluster = cluster.to_string();
        let service = service.to_string();

        wait_for_resource(
            WaitConfig {
                initial_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(30),
                timeout: Duration::from_secs(600),
            },
            None,
            || {
                let c = client.clone();
                let cluster = cluster.clone();
                let service = service.clone();
                async move {
                    let described = c
                        .describe_services()
                        .cluster(&cluster)
                        .services(&service)
                        .send()
                        .await
                        .context("Failed to describe service")?;
                    let Some(svc) = described.services().first() else {
                        return Ok(false);
                    };
                    let stable = svc.deployments().len() == 1
                        && svc.running_count() == svc.desired_count();
                    Ok(stable)
                }
            },
            "ECS service",
        )
        .await
    }

    async fn service_is_active(&self, cluster: &str, service: &str) -> Result<bool> {
        let described = self
            .client
            .describe_services()
            .cluster(cluster)
            .services(service)
            .send()
            .await;
        let described = match ignore_not_found(described)? {
            Some(d) => d,
            None => return Ok(false),
        };
        Ok(described
            .services()
            .first()
            .map(|s| s.status() == Some("ACTIVE"))
            .unwrap_or(false))
    }

    /// Current running/desired counts, for status reporting.
    pub async fn service_counts(
        &self,
        cluster: &str,
        service: &str,
    ) -> Result<Option<(i32, i32)>> {
        let described = self
            .client
            .describe_services()
            .cluster(cluster)
            .services(service)
            .send()
            .await;
        let described = match ignore_not_found(described)? {
            Some(d) => d,
            None => return Ok(None),
        };
        Ok(described
            .services()
            .first()
            .filter(|s| s.status() == Some("ACTIVE"))
            .map(|s| (s.running_count(), s.desired_count())))
    }

    /// Drain and delete the service. Returns Ok(()) if it doesn't exist.
    pub async fn delete_service(&self, cluster: &str, service: &str) -> Result<()> {
        if !self.service_is_active(cluster, service).await? {
            debug!(service = %service, "Service already deleted");
            return Ok(());
        }

        info!(service = %service, "Draining and deleting service");
        self.client
            .update_service()
            .cluster(cluster)
            .service(service)
            .desired_count(0)
            .send()
            .await
            .context("Failed to drain service")?;

        let result = self
            .client
            .delete_service()
            .cluster(cluster)
            .service(service)
            .force(true)
            .send()
            .await;
        ignore_not_found(result).context("Failed to delete service")?;
        info!(service = %service, "Service deleted");
        Ok(())
    }

    /// Deregister every revision of the task definition family.
    pub async fn deregister_task_family(&self, family: &str) -> Result<()> {
        let listed = self
            .client
            .list_task_definitions()
            .family_prefix(family)
            .send()
            .await
            .context("Failed to list task definitions")?;

        for arn in listed.task_definition_arns() {
            if let Err(e) = self
                .client
                .deregister_task_definition()
                .task_definition(arn)
                .send()
                .await
            {
                debug!(task_definition = %arn, error = ?e, "Failed to deregister task definition");
            }
        }
        Ok(())
    }

    /// Delete the cluster. Returns Ok(()) if it doesn't exist. Retries while
    /// the drained service is still detaching.
    pub async fn delete_cluster(&self, name: &str) -> Result<()> {
        info!(cluster = %name, "Deleting cluster");

        let cluster_name = name.to_string();
        (|| async {
            let result = self
                .client
                .delete_cluster()
                .cluster(&cluster_name)
                .send()
                .await;
            match ignore_not_found(result).context("Failed to delete cluster")? {
                Some(_) => info!(cluster = %cluster_name, "Cluster deleted"),
                None => debug!(cluster = %cluster_name, "Cluster already deleted"),
            }
            Ok(())
        })
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(5))
                .with_max_delay(Duration::from_secs(30))
                .with_max_times(5),
        )
        .when(|e| classify_anyhow_error(e).is_retryable())
        .notify(|e, dur| {
            warn!(delay = ?dur, error = %e, "Cluster deletion failed, retrying...");
        })
        .await
    }
}
