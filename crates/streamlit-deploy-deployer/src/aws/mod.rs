//! AWS client modules for the deployer
//!
//! This module provides wrappers around AWS SDK clients for:
//! - ECR: image repository and lifecycle policy
//! - EC2: dedicated VPC and the security-group graph
//! - ECS: cluster, task definition, service
//! - ELBv2: load balancer, target group, gate listener rules
//! - CloudFront: edge distribution and preflight function
//! - App Runner: managed serverless hosting
//! - IAM: execution and registry-access roles
//! - CloudWatch Logs: task log group
//! - Application Auto Scaling: CPU target tracking
//! - STS: account ID lookup

pub mod account;
pub mod alb;
pub mod apprunner;
pub mod autoscaling;
pub mod context;
pub mod docker;
pub mod ecr;
pub mod ecs;
pub mod edge;
pub mod error;
pub mod iam;
pub mod logs;
pub mod network;
pub mod tags;

// Core clients
pub use account::{get_current_account_id, registry_host, AccountId};
pub use alb::{AlbClient, LoadBalancerRef};
pub use apprunner::{AppRunnerClient, AppRunnerServiceRef};
pub use autoscaling::ScalingClient;
pub use context::AwsContext;
pub use docker::ImagePublisher;
pub use ecr::{EcrClient, RepositoryRef};
pub use ecs::EcsClient;
pub use edge::{DistributionRef, EdgeClient};
pub use iam::IamClient;
pub use logs::LogsClient;
pub use network::{NetworkClient, NetworkRef, SecurityGroupPair};

// Error handling
pub use error::{classify_anyhow_error, classify_aws_error, ignore_not_found, AwsError};
