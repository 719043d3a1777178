//! Image registry management
//!
//! Declares the repository the application image is pushed to, together
//! with its lifecycle policy: rule priority 1 expires stale untagged images,
//! rule priority 2 bounds the total image count. The registry-side lifecycle
//! engine evaluates rules in ascending priority, so the ordering is part of
//! the contract.

use crate::aws::context::AwsContext;
use crate::aws::error::{classify_sdk_error, ignore_not_found};
use crate::aws::tags::ecr_tags;
use anyhow::{Context, Result};
use aws_sdk_ecr::Client;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::json;
use streamlit_deploy_common::defaults::{MAX_STORED_IMAGES, UNTAGGED_IMAGE_EXPIRY_DAYS};
use tracing::{debug, info};

/// A provisioned repository, shared read-only with the compute units
#[derive(Debug, Clone)]
pub struct RepositoryRef {
    pub arn: String,
    pub name: String,
    /// Full URI images are tagged with (`<account>.dkr.ecr.<region>.amazonaws.com/<name>`)
    pub uri: String,
}

/// Credentials for pushing to the registry
#[derive(Clone)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    /// Registry endpoint, e.g. `https://<account>.dkr.ecr.<region>.amazonaws.com`
    pub endpoint: String,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// ECR client for managing the application's image repository
pub struct EcrClient {
    client: Client,
}

impl EcrClient {
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ecr_client(),
        }
    }

    /// Create the repository if it does not exist and apply the lifecycle
    /// policy. Safe to re-run: an existing repository is adopted as-is and
    /// its lifecycle policy refreshed.
    pub async fn ensure_repository(
        &self,
        name: &str,
        app: &str,
        environment: &str,
    ) -> Result<RepositoryRef> {
        info!(repository = %name, "Ensuring image repository");

        let create = self
            .client
            .create_repository()
            .repository_name(name)
            .set_tags(Some(ecr_tags(app, environment)?))
            .send()
            .await;

        let repository = match create {
            Ok(output) => output.repository().cloned(),
            Err(err) if classify_sdk_error(&err).is_already_exists() => {
                debug!(repository = %name, "Repository already exists, adopting");
                let described = self
                    .client
                    .describe_repositories()
                    .repository_names(name)
                    .send()
                    .await
                    .context("Failed to describe existing repository")?;
                described.repositories().first().cloned()
            }
            Err(err) => return Err(err).context("Failed to create repository"),
        };

        let repository = repository.context("No repository in response")?;
        let reference = RepositoryRef {
            arn: repository
                .repository_arn()
                .context("Repository has no ARN")?
                .to_string(),
            name: name.to_string(),
            uri: repository
                .repository_uri()
                .context("Repository has no URI")?
                .to_string(),
        };

        self.client
            .put_lifecycle_policy()
            .repository_name(name)
            .lifecycle_policy_text(lifecycle_policy())
            .send()
            .await
            .context("Failed to apply repository lifecycle policy")?;

        info!(repository = %name, arn = %reference.arn, "Image repository ready");
        Ok(reference)
    }

    /// Fetch docker credentials for the registry.
    pub async fn authorization(&self) -> Result<RegistryAuth> {
        let response = self
            .client
            .get_authorization_token()
            .send()
            .await
            .context("Failed to get registry authorization token")?;

        let auth = response
            .authorization_data()
            .first()
            .context("No authorization data returned")?;

        let token = auth
            .authorization_token()
            .context("Authorization data has no token")?;
        let endpoint = auth
            .proxy_endpoint()
            .context("Authorization data has no endpoint")?
            .to_string();

        let decoded = BASE64
            .decode(token)
            .context("Authorization token is not valid base64")?;
        let decoded = String::from_utf8(decoded).context("Authorization token is not UTF-8")?;
        let (username, password) = decoded
            .split_once(':')
            .context("Authorization token has no user:password separator")?;

        Ok(RegistryAuth {
            username: username.to_string(),
            password: password.to_string(),
            endpoint,
        })
    }

    /// Delete the repository and all images in it.
    ///
    /// Returns Ok(()) if the repository was deleted or never existed.
    pub async fn delete_repository(&self, name: &str) -> Result<()> {
        info!(repository = %name, "Deleting image repository");

        let result = self
            .client
            .delete_repository()
            .repository_name(name)
            .force(true)
            .send()
            .await;

        match ignore_not_found(result).context("Failed to delete repository")? {
            Some(_) => info!(repository = %name, "Repository deleted"),
            None => debug!(repository = %name, "Repository already deleted"),
        }
        Ok(())
    }

    /// Whether the repository currently exists.
    pub async fn repository_exists(&self, name: &str) -> bool {
        self.client
            .describe_repositories()
            .repository_names(name)
            .send()
            .await
            .is_ok()
    }
}

/// The repository lifecycle policy document.
///
/// Rule 1 expires untagged images once they are a week old; rule 2 keeps the
/// four most recent images regardless of tag. Priorities are fixed because
/// the lifecycle engine applies rules in ascending order until an image is
/// excluded.
pub fn lifecycle_policy() -> String {
    json!({
        "rules": [
            {
                "rulePriority": 1,
                "description": format!(
                    "Expire untagged images older than {UNTAGGED_IMAGE_EXPIRY_DAYS} days"
                ),
                "selection": {
                    "tagStatus": "untagged",
                    "countType": "sinceImagePushed",
                    "countUnit": "days",
                    "countNumber": UNTAGGED_IMAGE_EXPIRY_DAYS,
                },
                "action": { "type": "expire" },
            },
            {
                "rulePriority": 2,
                "description": format!("Keep only the last {MAX_STORED_IMAGES} images"),
                "selection": {
                    "tagStatus": "any",
                    "countType": "imageCountMoreThan",
                    "countNumber": MAX_STORED_IMAGES,
                },
                "action": { "type": "expire" },
            },
        ]
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_rule_priorities_are_fixed() {
        let policy: serde_json::Value = serde_json::from_str(&lifecycle_policy()).unwrap();
        let rules = policy["rules"].as_array().unwrap();
        assert_eq!(rules.len(), 2);

        assert_eq!(rules[0]["rulePriority"], 1);
        assert_eq!(rules[0]["selection"]["tagStatus"], "untagged");
        assert_eq!(rules[0]["selection"]["countType"], "sinceImagePushed");
        assert_eq!(rules[0]["selection"]["countNumber"], 7);

        assert_eq!(rules[1]["rulePriority"], 2);
        assert_eq!(rules[1]["selection"]["tagStatus"], "any");
        assert_eq!(rules[1]["selection"]["countType"], "imageCountMoreThan");
        assert_eq!(rules[1]["selection"]["countNumber"], 4);
    }

    #[test]
    fn lifecycle_rules_both_expire() {
        let policy: serde_json::Value = serde_json::from_str(&lifecycle_policy()).unwrap();
        for rule in policy["rules"].as_array().unwrap() {
            assert_eq!(rule["action"]["type"], "expire");
        }
    }
}
