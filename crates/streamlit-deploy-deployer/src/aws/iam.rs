//! IAM role management for the compute topologies
//!
//! The orchestrated topology needs a task execution role that can pull from
//! the image repository and write task logs; the managed hosting topology
//! needs an access role its builder assumes to pull from the repository.

use crate::aws::context::AwsContext;
use crate::aws::error::classify_sdk_error;
use crate::aws::tags::iam_tags;
use crate::wait::{wait_for_resource, WaitConfig};
use anyhow::{Context, Result};
use aws_sdk_iam::Client;
use tracing::{debug, info, warn};

/// The trust policy allowing the orchestrator's tasks to assume the role
const ECS_TASKS_ASSUME_ROLE_POLICY: &str = r#"{
    "Version": "2012-10-17",
    "Statement": [
        {
            "Effect": "Allow",
            "Principal": {
                "Service": "ecs-tasks.amazonaws.com"
            },
            "Action": "sts:AssumeRole"
        }
    ]
}"#;

/// The trust policy allowing the managed hosting builder to assume the role
const APP_RUNNER_ASSUME_ROLE_POLICY: &str = r#"{
    "Version": "2012-10-17",
    "Statement": [
        {
            "Effect": "Allow",
            "Principal": {
                "Service": "build.apprunner.amazonaws.com"
            },
            "Action": "sts:AssumeRole"
        }
    ]
}"#;

/// Managed policy granting the execution role image pulls and log writes
const ECS_EXECUTION_MANAGED_POLICY: &str =
    "arn:aws:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy";

/// Managed policy granting the App Runner access role registry pulls
const APP_RUNNER_ECR_MANAGED_POLICY: &str =
    "arn:aws:iam::aws:policy/service-role/AWSAppRunnerServicePolicyForECRAccess";

/// Inline policy name attached to the execution role
const EXECUTION_POLICY_NAME: &str = "streamlit-deploy-execution";

/// Generate the inline policy for the task execution role.
///
/// Scoped to the deployment's repository and log group:
/// - registry pulls (auth token issuance is account-wide by design)
/// - log stream creation and event writes
fn execution_policy(repository_arn: &str, log_group_arn: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Sid": "RegistryAuth",
                "Effect": "Allow",
                "Action": ["ecr:GetAuthorizationToken"],
                "Resource": "*"
            },
            {
                "Sid": "RegistryPull",
                "Effect": "Allow",
                "Action": [
                    "ecr:BatchCheckLayerAvailability",
                    "ecr:GetDownloadUrlForLayer",
                    "ecr:BatchGetImage"
                ],
                "Resource": repository_arn
            },
            {
                "Sid": "LogWrite",
                "Effect": "Allow",
                "Action": ["logs:CreateLogStream", "logs:PutLogEvents"],
                "Resource": format!("{log_group_arn}:*")
            }
        ]
    })
    .to_string()
}

/// IAM client for managing deployment roles
pub struct IamClient {
    client: Client,
}

impl IamClient {
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.iam_client(),
        }
    }

    /// Create the task execution role for the orchestrated topology.
    ///
    /// Returns the role ARN. Safe to re-run: an existing role is adopted and
    /// its policies refreshed.
    pub async fn ensure_task_execution_role(
        &self,
        role_name: &str,
        repository_arn: &str,
        log_group_arn: &str,
        app: &str,
        environment: &str,
    ) -> Result<String> {
        info!(role_name = %role_name, "Ensuring task execution role");

        let role_arn = self
            .ensure_role(role_name, ECS_TASKS_ASSUME_ROLE_POLICY, app, environment)
            .await?;

        self.client
            .put_role_policy()
            .role_name(role_name)
            .policy_name(EXECUTION_POLICY_NAME)
            .policy_document(execution_policy(repository_arn, log_group_arn))
            .send()
            .await
            .context("Failed to attach inline policy to execution role")?;
        debug!(role_name = %role_name, "Inline policy attached");

        self.client
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(ECS_EXECUTION_MANAGED_POLICY)
            .send()
            .await
            .context("Failed to attach execution managed policy")?;
        debug!(role_name = %role_name, "Execution managed policy attached");

        self.wait_until_visible(role_name).await?;
        info!(role_name = %role_name, role_arn = %role_arn, "Task execution role ready");
        Ok(role_arn)
    }

    /// Create the registry access role for the managed hosting topology.
    pub async fn ensure_apprunner_access_role(
        &self,
        role_name: &str,
        app: &str,
        environment: &str,
    ) -> Result<String> {
        info!(role_name = %role_name, "Ensuring App Runner access role");

        let role_arn = self
            .ensure_role(role_name, APP_RUNNER_ASSUME_ROLE_POLICY, app, environment)
            .await?;

        self.client
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(APP_RUNNER_ECR_MANAGED_POLICY)
            .send()
            .await
            .context("Failed to attach App Runner ECR managed policy")?;

        self.wait_until_visible(role_name).await?;
        info!(role_name = %role_name, role_arn = %role_arn, "App Runner access role ready");
        Ok(role_arn)
    }

    async fn ensure_role(
        &self,
        role_name: &str,
        assume_role_policy: &str,
        app: &str,
        environment: &str,
    ) -> Result<String> {
        let create = self
            .client
            .create_role()
            .role_name(role_name)
            .assume_role_policy_document(assume_role_policy)
            .description(format!("streamlit-deploy role for {app} ({environment})"))
            .set_tags(Some(iam_tags(app, environment)?))
            .send()
            .await;

        match create {
            Ok(output) => {
                let arn = output
                    .role()
                    .map(|r| r.arn().to_string())
                    .context("No role in create response")?;
                debug!(role_name = %role_name, "IAM role created");
                Ok(arn)
            }
            Err(err) if classify_sdk_error(&err).is_already_exists() => {
                let existing = self
                    .client
                    .get_role()
                    .role_name(role_name)
                    .send()
                    .await
                    .context("Failed to get existing role")?;
                let arn = existing
                    .role()
                    .map(|r| r.arn().to_string())
                    .context("No role in get response")?;
                debug!(role_name = %role_name, "Adopting existing IAM role");
                Ok(arn)
            }
            Err(err) => Err(err).context("Failed to create IAM role"),
        }
    }

    /// Wait for the role to be visible to the IAM API.
    ///
    /// Note: the consuming service may still not recognize the role due to
    /// eventual consistency; callers retry on that classification.
    async fn wait_until_visible(&self, role_name: &str) -> Result<()> {
        let client = self.client.clone();
        let name = role_name.to_string();
        wait_for_resource(
            WaitConfig::iam_propagation(),
            None,
            || {
                let c = client.clone();
                let n = name.clone();
                async move { Ok(c.get_role().role_name(&n).send().await.is_ok()) }
            },
            "IAM role",
        )
        .await
        .context("Waiting for IAM role visibility")
    }

    /// Delete a role together with its inline and managed policies.
    ///
    /// Individual detach failures are logged and skipped so a partially
    /// deleted role can still be removed.
    pub async fn delete_role(&self, role_name: &str) -> Result<()> {
        info!(role_name = %role_name, "Deleting IAM role");

        if let Err(e) = self
            .client
            .delete_role_policy()
            .role_name(role_name)
            .policy_name(EXECUTION_POLICY_NAME)
            .send()
            .await
        {
            debug!(error = ?e, "Failed to delete inline policy (may not exist)");
        }

        for policy_arn in [ECS_EXECUTION_MANAGED_POLICY, APP_RUNNER_ECR_MANAGED_POLICY] {
            if let Err(e) = self
                .client
                .detach_role_policy()
                .role_name(role_name)
                .policy_arn(policy_arn)
                .send()
                .await
            {
                debug!(error = ?e, policy_arn, "Failed to detach managed policy (may not be attached)");
            }
        }

        if let Err(e) = self.client.delete_role().role_name(role_name).send().await {
            if classify_sdk_error(&e).is_not_found() {
                debug!(role_name = %role_name, "Role already deleted");
            } else {
                warn!(error = ?e, role_name = %role_name, "Failed to delete IAM role");
            }
        } else {
            info!(role_name = %role_name, "IAM role deleted");
        }

        Ok(())
    }

    /// Whether a role currently exists.
    pub async fn role_exists(&self, role_name: &str) -> bool {
        self.client
            .get_role()
            .role_name(role_name)
            .send()
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_policy_scopes_pull_and_log_statements() {
        let policy = execution_policy(
            "arn:aws:ecr:eu-west-1:123456789012:repository/demo",
            "arn:aws:logs:eu-west-1:123456789012:log-group:/streamlit-deploy/demo-dev",
        );
        let doc: serde_json::Value = serde_json::from_str(&policy).unwrap();
        let statements = doc["Statement"].as_array().unwrap();
        assert_eq!(statements.len(), 3);

        assert_eq!(statements[0]["Action"][0], "ecr:GetAuthorizationToken");
        assert_eq!(statements[0]["Resource"], "*");

        assert_eq!(
            statements[1]["Resource"],
            "arn:aws:ecr:eu-west-1:123456789012:repository/demo"
        );

        assert_eq!(statements[2]["Action"][0], "logs:CreateLogStream");
        assert_eq!(
            statements[2]["Resource"],
            "arn:aws:logs:eu-west-1:123456789012:log-group:/streamlit-deploy/demo-dev:*"
        );
    }

    #[test]
    fn trust_policies_name_the_right_principals() {
        let ecs: serde_json::Value = serde_json::from_str(ECS_TASKS_ASSUME_ROLE_POLICY).unwrap();
        assert_eq!(
            ecs["Statement"][0]["Principal"]["Service"],
            "ecs-tasks.amazonaws.com"
        );

        let apprunner: serde_json::Value =
            serde_json::from_str(APP_RUNNER_ASSUME_ROLE_POLICY).unwrap();
        assert_eq!(
            apprunner["Statement"][0]["Principal"]["Service"],
            "build.apprunner.amazonaws.com"
        );
    }
}
