//! Managed serverless hosting topology
//!
//! App Runner manages ingress, scaling, and health checking internally; the
//! deployer only binds the pushed image, the container port, and the
//! registry access role.

use crate::aws::context::AwsContext;
use crate::aws::error::classify_anyhow_error;
use crate::aws::tags::apprunner_tags;
use crate::wait::{wait_for_resource, WaitConfig};
use anyhow::{Context, Result};
use aws_sdk_apprunner::types::{
    AuthenticationConfiguration, ImageConfiguration, ImageRepository, ImageRepositoryType,
    ServiceStatus, SourceConfiguration,
};
use aws_sdk_apprunner::Client;
use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A provisioned managed hosting service
#[derive(Debug, Clone)]
pub struct AppRunnerServiceRef {
    pub arn: String,
    /// Public hostname assigned by the provider (no scheme)
    pub url: String,
}

/// App Runner client for the managed hosting topology
pub struct AppRunnerClient {
    client: Client,
}

impl AppRunnerClient {
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.apprunner_client(),
        }
    }

    /// Create the service bound to the image, adopting an existing one with
    /// the same name. Retries creation while the freshly created access role
    /// is still propagating.
    pub async fn ensure_service(
        &self,
        name: &str,
        image_uri: &str,
        container_port: u16,
        access_role_arn: &str,
        app: &str,
        environment: &str,
    ) -> Result<AppRunnerServiceRef> {
        if let Some(existing) = self.find_service(name).await? {
            info!(service = %name, "Reusing existing managed service");
            return Ok(existing);
        }

        info!(service = %name, image = %image_uri, "Creating managed service");

        let source = SourceConfiguration::builder()
            .authentication_configuration(
                AuthenticationConfiguration::builder()
                    .access_role_arn(access_role_arn)
                    .build(),
            )
            // Deploys happen through this tool, not on image push
            .auto_deployments_enabled(false)
            .image_repository(
                ImageRepository::builder()
                    .image_identifier(image_uri)
                    .image_repository_type(ImageRepositoryType::Ecr)
                    .image_configuration(
                        ImageConfiguration::builder()
                            .port(container_port.to_string())
                            .build(),
                    )
                    .build()
                    .context("Failed to build image repository source")?,
            )
            .build();

        let service_name = name.to_string();
        let create = || async {
            self.client
                .create_service()
                .service_name(&service_name)
                .source_configuration(source.clone())
                .set_tags(Some(apprunner_tags(app, environment)))
                .send()
                .await
                .context("Failed to create managed service")
        };

        let created = create
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

        let service = created.service().context("No service in response")?;
        let reference = AppRunnerServiceRef {
            arn: service.service_arn().to_string(),
            url: service
                .service_url()
                .context("Service has no URL")?
                .to_string(),
        };

        info!(arn = %reference.arn, url = %reference.url, "Managed service created");
        Ok(reference)
    }

    /// Wait for the service to reach RUNNING.
    pub async fn wait_for_running(&self, service_arn: &str) -> Result<()> {
        let client = self.client.clone();
        let arn = service_arn.to_string();

        wait_for_resource(
            WaitConfig {
                initial_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(30),
                timeout: Duration::from_secs(900),
            },
            None,
            || {
                let c = client.clone();
                let arn = arn.clone();
                async move {
                    let described = c
                        .describe_service()
                        .service_arn(&arn)
                        .send()
                        .await
                        .context("Failed to describe managed service")?;
                    let status = described
                        .service()
                        .map(|s| s.status().clone())
                        .context("No service in describe response")?;
                    match status {
                        ServiceStatus::Running => Ok(true),
                        ServiceStatus::CreateFailed => {
                            anyhow::bail!("Managed service creation failed")
                        }
                        _ => Ok(false),
                    }
                }
            },
            "managed service",
        )
        .await
    }

    /// Find a service by name, if it exists.
    pub async fn find_service(&self, name: &str) -> Result<Option<AppRunnerServiceRef>> {
        let mut next_token: Option<String> = None;
        loop {
            let mut request = self.client.list_services();
            if let Some(token) = &next_token {
                request = request.next_token(token);
            }
            let listed = request.send().await.context("Failed to list services")?;

            for summary in listed.service_summary_list() {
                if summary.service_name() == Some(name) {
                    let arn = summary
                        .service_arn()
                        .context("Service summary has no ARN")?
                        .to_string();
                    // The summary omits the URL; describe for the full record
                    let described = self
                        .client
                        .describe_service()
                        .service_arn(&arn)
                        .send()
                        .await
                        .context("Failed to describe managed service")?;
                    let service = described.service().context("No service in response")?;
                    return Ok(Some(AppRunnerServiceRef {
                        arn,
                        url: service
                            .service_url()
                            .context("Service has no URL")?
                            .to_string(),
                    }));
                }
            }

            match listed.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => return Ok(None),
            }
        }
    }

    /// Current service status, for status reporting.
    pub async fn service_status(&self, name: &str) -> Result<Option<String>> {
        let Some(reference) = self.find_service(name).await? else {
            return Ok(None);
        };
        let described = self
            .client
            .describe_service()
            .service_arn(&reference.arn)
            .send()
            .await
            .context("Failed to describe managed service")?;
        Ok(described
            .service()
            .map(|s| s.status().as_str().to_string()))
    }

    /// Delete the service. Returns Ok(()) if it doesn't exist.
    pub async fn delete_service(&self, name: &str) -> Result<()> {
        let Some(reference) = self.find_service(name).await? else {
            debug!(service = %name, "Managed service already deleted");
            return Ok(());
        };

        info!(service = %name, "Deleting managed service");
        self.client
            .delete_service()
            .service_arn(&reference.arn)
            .send()
            .await
            .context("Failed to delete managed service")?;
        info!(service = %name, "Managed service deletion started");
        Ok(())
    }
}
