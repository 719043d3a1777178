//! Environment-driven deployment configuration
//!
//! Configuration is resolved exactly once, at process start, and passed
//! explicitly into every downstream unit as an immutable record. No unit
//! reads process environment state directly.

use crate::defaults::DEFAULT_IMAGE_TAG;
use crate::platform::Platform;
use serde::Serialize;
use thiserror::Error;

/// Comma-separated list of regions to deploy to
pub const ENV_DEPLOY_REGIONS: &str = "CDK_DEPLOY_REGIONS";

/// Comma-separated list of environment names (dev, staging, ...)
pub const ENV_ENVIRONMENTS: &str = "ENVIRONMENTS";

/// Name of the image repository to create and push to
pub const ENV_REPOSITORY_NAME: &str = "ECR_REPOSITORY_NAME";

/// Application name; feeds resource naming and the origin-verification header
pub const ENV_APP_NAME: &str = "APP_NAME";

/// Image version tag; defaults to "latest"
pub const ENV_IMAGE_VERSION: &str = "IMAGE_VERSION";

/// Container platform (LINUX_AMD64 or LINUX_ARM64)
pub const ENV_PLATFORMS: &str = "PLATFORMS";

/// Port the container listens on
pub const ENV_PORT: &str = "PORT";

/// Configuration resolution failures
#[derive(Debug, Error)]
pub enum ConfigError {
    /// One or more required variables are absent. All missing keys are
    /// reported at once rather than failing on the first.
    #[error("missing required configuration: {}", keys.join(", "))]
    Missing { keys: Vec<String> },

    #[error("PLATFORMS: {source}")]
    InvalidPlatform {
        #[from]
        source: crate::platform::UnknownPlatform,
    },

    #[error("PORT: '{value}' is not a valid port")]
    InvalidPort { value: String },
}

/// Immutable configuration for one deployment target.
///
/// Created once at startup and threaded through the composition tree; never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentConfig {
    pub region: String,
    pub environment: String,
    pub app_name: String,
    pub repository_name: String,
    pub image_version: String,
    pub platform: Platform,
    pub port: u16,
}

impl DeploymentConfig {
    /// Whether the requested version is the "latest" sentinel
    pub fn is_latest(&self) -> bool {
        self.image_version == DEFAULT_IMAGE_TAG
    }

    /// Tags to push for this version: the requested version, plus "latest"
    /// when the version is not itself the sentinel.
    pub fn push_tags(&self) -> Vec<String> {
        if self.is_latest() {
            vec![DEFAULT_IMAGE_TAG.to_string()]
        } else {
            vec![
                self.image_version.clone(),
                DEFAULT_IMAGE_TAG.to_string(),
            ]
        }
    }
}

/// The full set of resolved environment settings, before expansion into
/// per-(region, environment) deployment targets.
#[derive(Debug, Clone)]
pub struct EnvironmentSettings {
    pub regions: Vec<String>,
    pub environments: Vec<String>,
    pub app_name: String,
    pub repository_name: String,
    pub image_version: String,
    pub platform: Platform,
    pub port: u16,
}

impl EnvironmentSettings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Resolve settings through a lookup function. Split out from
    /// [`Self::from_env`] so tests don't mutate process state.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let mut require = |key: &str| match lookup(key) {
            Some(v) if !v.trim().is_empty() => Some(v),
            _ => {
                missing.push(key.to_string());
                None
            }
        };

        let regions = require(ENV_DEPLOY_REGIONS);
        let environments = require(ENV_ENVIRONMENTS);
        let repository_name = require(ENV_REPOSITORY_NAME);
        let app_name = require(ENV_APP_NAME);
        let platform = require(ENV_PLATFORMS);
        let port = require(ENV_PORT);
        drop(require);

        let (
            Some(regions),
            Some(environments),
            Some(repository_name),
            Some(app_name),
            Some(platform),
            Some(port),
        ) = (regions, environments, repository_name, app_name, platform, port)
        else {
            return Err(ConfigError::Missing { keys: missing });
        };

        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort { value: port })?;

        Ok(Self {
            regions: split_list(&regions),
            environments: split_list(&environments),
            app_name: app_name.trim().to_string(),
            repository_name: repository_name.trim().to_string(),
            image_version: lookup(ENV_IMAGE_VERSION)
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|| DEFAULT_IMAGE_TAG.to_string()),
            platform: platform.parse()?,
            port,
        })
    }

    /// Expand into one immutable config per (region, environment) pair,
    /// deployed sequentially by the orchestrator.
    pub fn targets(&self) -> Vec<DeploymentConfig> {
        let mut targets = Vec::new();
        for region in &self.regions {
            for environment in &self.environments {
                targets.push(DeploymentConfig {
                    region: region.clone(),
                    environment: environment.clone(),
                    app_name: self.app_name.clone(),
                    repository_name: self.repository_name.clone(),
                    image_version: self.image_version.clone(),
                    platform: self.platform,
                    port: self.port,
                });
            }
        }
        targets
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            (ENV_DEPLOY_REGIONS, "eu-west-1"),
            (ENV_ENVIRONMENTS, "dev"),
            (ENV_REPOSITORY_NAME, "demo-repo"),
            (ENV_APP_NAME, "demo"),
            (ENV_IMAGE_VERSION, "1.2.0"),
            (ENV_PLATFORMS, "LINUX_ARM64"),
            (ENV_PORT, "8501"),
        ])
    }

    fn resolve(env: &HashMap<&str, &str>) -> Result<EnvironmentSettings, ConfigError> {
        EnvironmentSettings::resolve(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn resolves_complete_environment() {
        let settings = resolve(&base_env()).unwrap();
        assert_eq!(settings.regions, vec!["eu-west-1"]);
        assert_eq!(settings.app_name, "demo");
        assert_eq!(settings.image_version, "1.2.0");
        assert_eq!(settings.platform, Platform::Arm64);
        assert_eq!(settings.port, 8501);
    }

    #[test]
    fn missing_variables_are_all_reported() {
        let mut env = base_env();
        env.remove(ENV_APP_NAME);
        env.remove(ENV_PORT);

        let err = resolve(&env).unwrap_err();
        match err {
            ConfigError::Missing { keys } => {
                assert_eq!(keys, vec![ENV_APP_NAME, ENV_PORT]);
            }
            other => panic!("expected Missing, got {other:?}"),
        }
    }

    #[test]
    fn image_version_defaults_to_latest() {
        let mut env = base_env();
        env.remove(ENV_IMAGE_VERSION);
        let settings = resolve(&env).unwrap();
        assert_eq!(settings.image_version, "latest");
    }

    #[test]
    fn unknown_platform_is_rejected() {
        let mut env = base_env();
        env.insert(ENV_PLATFORMS, "LINUX_MIPS");
        assert!(matches!(
            resolve(&env).unwrap_err(),
            ConfigError::InvalidPlatform { .. }
        ));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let mut env = base_env();
        env.insert(ENV_PORT, "streamlit");
        assert!(matches!(
            resolve(&env).unwrap_err(),
            ConfigError::InvalidPort { .. }
        ));
    }

    #[test]
    fn targets_expand_region_environment_product() {
        let mut env = base_env();
        env.insert(ENV_DEPLOY_REGIONS, "eu-west-1, us-east-1");
        env.insert(ENV_ENVIRONMENTS, "dev,prod");

        let targets = resolve(&env).unwrap().targets();
        assert_eq!(targets.len(), 4);
        assert_eq!(targets[0].region, "eu-west-1");
        assert_eq!(targets[0].environment, "dev");
        assert_eq!(targets[3].region, "us-east-1");
        assert_eq!(targets[3].environment, "prod");
    }

    #[test]
    fn push_tags_include_latest_only_for_pinned_versions() {
        let settings = resolve(&base_env()).unwrap();
        let config = &settings.targets()[0];
        assert_eq!(config.push_tags(), vec!["1.2.0", "latest"]);

        let mut env = base_env();
        env.insert(ENV_IMAGE_VERSION, "latest");
        let config = &resolve(&env).unwrap().targets()[0];
        assert_eq!(config.push_tags(), vec!["latest"]);
    }
}
