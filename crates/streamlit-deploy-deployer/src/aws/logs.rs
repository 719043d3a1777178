//! Task log group management

use crate::aws::context::AwsContext;
use crate::aws::error::{classify_sdk_error, ignore_not_found};
use crate::aws::tags::standard_tags;
use anyhow::{Context, Result};
use aws_sdk_cloudwatchlogs::Client;
use streamlit_deploy_common::defaults::LOG_RETENTION_DAYS;
use tracing::{debug, info};

/// CloudWatch Logs client for the deployment's task log group
pub struct LogsClient {
    client: Client,
}

impl LogsClient {
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.logs_client(),
        }
    }

    /// Create the log group if it does not exist and set retention.
    pub async fn ensure_log_group(
        &self,
        name: &str,
        app: &str,
        environment: &str,
    ) -> Result<()> {
        let mut request = self.client.create_log_group().log_group_name(name);
        for (k, v) in standard_tags(app, environment) {
            request = request.tags(k, v);
        }

        match request.send().await {
            Ok(_) => info!(log_group = %name, "Log group created"),
            Err(err) if classify_sdk_error(&err).is_already_exists() => {
                debug!(log_group = %name, "Log group already exists");
            }
            Err(err) => return Err(err).context("Failed to create log group"),
        }

        self.client
            .put_retention_policy()
            .log_group_name(name)
            .retention_in_days(LOG_RETENTION_DAYS)
            .send()
            .await
            .context("Failed to set log group retention")?;

        Ok(())
    }

    /// Delete the log group. Returns Ok(()) if it doesn't exist.
    pub async fn delete_log_group(&self, name: &str) -> Result<()> {
        info!(log_group = %name, "Deleting log group");
        let result = self
            .client
            .delete_log_group()
            .log_group_name(name)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to delete log group")? {
            Some(_) => info!(log_group = %name, "Log group deleted"),
            None => debug!(log_group = %name, "Log group already deleted"),
        }
        Ok(())
    }
}

/// ARN of a log group, needed for the execution role's inline policy
pub fn log_group_arn(account_id: &str, region: &str, name: &str) -> String {
    format!("arn:aws:logs:{region}:{account_id}:log-group:{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_group_arn_format() {
        assert_eq!(
            log_group_arn("123456789012", "eu-west-1", "/streamlit-deploy/demo-dev"),
            "arn:aws:logs:eu-west-1:123456789012:log-group:/streamlit-deploy/demo-dev"
        );
    }
}
