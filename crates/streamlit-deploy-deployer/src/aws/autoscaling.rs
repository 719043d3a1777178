//! CPU-tracking autoscaling for the orchestrated service
//!
//! Declares the scalable target bounds and the target-tracking policy; the
//! control loop itself is owned by the provider.

use crate::aws::context::AwsContext;
use crate::aws::error::ignore_not_found;
use anyhow::{Context, Result};
use aws_sdk_applicationautoscaling::types::{
    MetricType, PolicyType, PredefinedMetricSpecification, ScalableDimension, ServiceNamespace,
    TargetTrackingScalingPolicyConfiguration,
};
use aws_sdk_applicationautoscaling::Client;
use streamlit_deploy_common::defaults::{
    AUTOSCALE_COOLDOWN_SECS, AUTOSCALE_CPU_TARGET_PERCENT, AUTOSCALE_MAX_TASKS,
    AUTOSCALE_MIN_TASKS,
};
use tracing::{debug, info};

/// Application Auto Scaling client for the service's task count
pub struct ScalingClient {
    client: Client,
}

impl ScalingClient {
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.autoscaling_client(),
        }
    }

    /// Register the service's task count as a scalable target and attach the
    /// CPU target-tracking policy. Both calls are idempotent upserts.
    pub async fn configure_service_scaling(
        &self,
        cluster: &str,
        service: &str,
        policy_name: &str,
    ) -> Result<()> {
        let resource_id = service_resource_id(cluster, service);
        info!(resource = %resource_id, "Configuring service autoscaling");

        self.client
            .register_scalable_target()
            .service_namespace(ServiceNamespace::Ecs)
            .resource_id(&resource_id)
            .scalable_dimension(ScalableDimension::EcsServiceDesiredCount)
            .min_capacity(AUTOSCALE_MIN_TASKS)
            .max_capacity(AUTOSCALE_MAX_TASKS)
            .send()
            .await
            .context("Failed to register scalable target")?;

        self.client
            .put_scaling_policy()
            .policy_name(policy_name)
            .service_namespace(ServiceNamespace::Ecs)
            .resource_id(&resource_id)
            .scalable_dimension(ScalableDimension::EcsServiceDesiredCount)
            .policy_type(PolicyType::TargetTrackingScaling)
            .target_tracking_scaling_policy_configuration(cpu_target_tracking_config()?)
            .send()
            .await
            .context("Failed to attach scaling policy")?;

        info!(
            min = AUTOSCALE_MIN_TASKS,
            max = AUTOSCALE_MAX_TASKS,
            target = AUTOSCALE_CPU_TARGET_PERCENT,
            "Autoscaling configured"
        );
        Ok(())
    }

    /// Remove the scaling policy and deregister the scalable target.
    /// Returns Ok(()) when neither exists.
    pub async fn remove_service_scaling(
        &self,
        cluster: &str,
        service: &str,
        policy_name: &str,
    ) -> Result<()> {
        let resource_id = service_resource_id(cluster, service);
        info!(resource = %resource_id, "Removing service autoscaling");

        let result = self
            .client
            .delete_scaling_policy()
            .policy_name(policy_name)
            .service_namespace(ServiceNamespace::Ecs)
            .resource_id(&resource_id)
            .scalable_dimension(ScalableDimension::EcsServiceDesiredCount)
            .send()
            .await;
        if ignore_not_found(result)
            .context("Failed to delete scaling policy")?
            .is_none()
        {
            debug!(resource = %resource_id, "Scaling policy already removed");
        }

        let result = self
            .client
            .deregister_scalable_target()
            .service_namespace(ServiceNamespace::Ecs)
            .resource_id(&resource_id)
            .scalable_dimension(ScalableDimension::EcsServiceDesiredCount)
            .send()
            .await;
        if ignore_not_found(result)
            .context("Failed to deregister scalable target")?
            .is_none()
        {
            debug!(resource = %resource_id, "Scalable target already removed");
        }

        Ok(())
    }
}

/// Resource id the scaling service uses to address an ECS service
pub fn service_resource_id(cluster: &str, service: &str) -> String {
    format!("service/{cluster}/{service}")
}

/// The CPU target-tracking configuration: 70% average utilization, bounded
/// by 60-second cooldowns in both directions.
pub fn cpu_target_tracking_config() -> Result<TargetTrackingScalingPolicyConfiguration> {
    TargetTrackingScalingPolicyConfiguration::builder()
        .target_value(AUTOSCALE_CPU_TARGET_PERCENT)
        .predefined_metric_specification(
            PredefinedMetricSpecification::builder()
                .predefined_metric_type(MetricType::EcsServiceAverageCpuUtilization)
                .build()
                .context("Failed to build metric specification")?,
        )
        .scale_in_cooldown(AUTOSCALE_COOLDOWN_SECS)
        .scale_out_cooldown(AUTOSCALE_COOLDOWN_SECS)
        .build()
        .context("Failed to build target tracking configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_addresses_the_service() {
        assert_eq!(
            service_resource_id("demo-dev-cluster", "demo-dev-service"),
            "service/demo-dev-cluster/demo-dev-service"
        );
    }

    #[test]
    fn target_tracking_follows_cpu_at_seventy_percent() {
        let config = cpu_target_tracking_config().unwrap();
        assert_eq!(config.target_value(), 70.0);
        assert_eq!(config.scale_in_cooldown(), Some(60));
        assert_eq!(config.scale_out_cooldown(), Some(60));

        let metric = config.predefined_metric_specification().unwrap();
        assert_eq!(
            metric.predefined_metric_type(),
            &MetricType::EcsServiceAverageCpuUtilization
        );
    }

    #[test]
    fn scaling_bounds_are_one_to_two_tasks() {
        assert_eq!(AUTOSCALE_MIN_TASKS, 1);
        assert_eq!(AUTOSCALE_MAX_TASKS, 2);
    }
}
