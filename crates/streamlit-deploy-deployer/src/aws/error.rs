//! AWS error classification and handling
//!
//! Provides typed errors for AWS SDK operations using the error metadata
//! `.code()` instead of string matching on Debug format. Classification
//! drives idempotency (not-found and already-exists are expected states when
//! re-running a deployment) and retries (throttling, dependency violations,
//! IAM propagation).

use aws_sdk_ec2::error::ProvideErrorMetadata;
use thiserror::Error;

/// AWS error categories for retry and teardown logic
#[derive(Debug, Error)]
pub enum AwsError {
    /// Resource was not found (safe to skip in teardown)
    #[error("Resource not found: {message}")]
    NotFound { message: String },

    /// Resource already exists (safe to adopt in create operations)
    #[error("Resource already exists")]
    AlreadyExists,

    /// IAM role not yet visible to the consuming service (eventual
    /// consistency, retryable)
    #[error("IAM role not yet visible (eventual consistency)")]
    IamPropagationDelay,

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// Resource has dependent objects still attached (retryable, e.g. a
    /// security group whose interfaces are still releasing)
    #[error("Resource has dependent objects")]
    DependencyViolation,

    /// Generic AWS SDK error with code and message
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AwsError::IamPropagationDelay | AwsError::Throttled | AwsError::DependencyViolation
        )
    }
}

/// Known AWS error codes for "not found" conditions across the services the
/// deployer touches
const NOT_FOUND_CODES: &[&str] = &[
    // EC2
    "InvalidVpcID.NotFound",
    "InvalidGroup.NotFound",
    "InvalidPermission.NotFound",
    "InvalidSubnetID.NotFound",
    "InvalidInternetGatewayID.NotFound",
    "InvalidRouteTableID.NotFound",
    // ECR
    "RepositoryNotFoundException",
    "LifecyclePolicyNotFoundException",
    // ECS
    "ClusterNotFoundException",
    "ServiceNotFoundException",
    // ELBv2
    "LoadBalancerNotFound",
    "TargetGroupNotFound",
    "ListenerNotFound",
    "RuleNotFound",
    // CloudFront
    "NoSuchDistribution",
    "NoSuchFunctionExists",
    // IAM
    "NoSuchEntity",
    // App Runner / CloudWatch Logs
    "ResourceNotFoundException",
    // Application Auto Scaling
    "ObjectNotFoundException",
];

/// Known AWS error codes for "already exists" conditions
const ALREADY_EXISTS_CODES: &[&str] = &[
    "InvalidPermission.Duplicate",
    "InvalidGroup.Duplicate",
    "RepositoryAlreadyExistsException",
    "EntityAlreadyExists",
    "ResourceAlreadyExistsException",
    "DuplicateLoadBalancerName",
    "DuplicateTargetGroupName",
    "DuplicateListener",
    "PriorityInUse",
    "FunctionAlreadyExists",
    "DistributionAlreadyExists",
];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
];

/// Known AWS error codes for dependency violations (resource still in use)
const DEPENDENCY_CODES: &[&str] = &[
    "DependencyViolation",
    "ResourceInUseException",
    "ResourceInUse",
    "ClusterContainsServicesException",
    "ClusterContainsTasksException",
    "DistributionNotDisabled",
];

/// Classify an AWS SDK error using the error code.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound { message },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists,
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        Some(c) if DEPENDENCY_CODES.contains(&c) => AwsError::DependencyViolation,
        Some("InvalidParameterValue") if message.contains("role") => AwsError::IamPropagationDelay,
        Some(_) if message.contains("unable to assume the role")
            || message.contains("is not authorized to assume") =>
        {
            AwsError::IamPropagationDelay
        }
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify any SDK operation error through its metadata.
pub fn classify_sdk_error<E>(error: &E) -> AwsError
where
    E: ProvideErrorMetadata,
{
    classify_aws_error(error.code(), error.message())
}

/// Classify an `anyhow::Error` by extracting the AWS error code from its
/// debug representation. Used where errors have already been wrapped with
/// context and the typed SDK error is out of reach.
pub fn classify_anyhow_error(error: &anyhow::Error) -> AwsError {
    let debug_str = format!("{:?}", error);
    if let Some(code) = extract_error_code(&debug_str) {
        return classify_aws_error(Some(&code), Some(&debug_str));
    }

    AwsError::Sdk {
        code: None,
        message: error.to_string(),
    }
}

/// Convert a fallible SDK call into `Ok(None)` when the failure is a
/// "not found" condition, keeping teardown idempotent.
pub fn ignore_not_found<T, E>(result: Result<T, E>) -> anyhow::Result<Option<T>>
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            if classify_sdk_error(&err).is_not_found() {
                Ok(None)
            } else {
                Err(err.into())
            }
        }
    }
}

/// Convert a fallible SDK call into `Ok(None)` when the resource already
/// exists, letting create operations adopt the existing resource.
pub fn ignore_already_exists<T, E>(result: Result<T, E>) -> anyhow::Result<Option<T>>
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            if classify_sdk_error(&err).is_already_exists() {
                Ok(None)
            } else {
                Err(err.into())
            }
        }
    }
}

/// Extract a known AWS error code from a debug string representation
fn extract_error_code(debug_str: &str) -> Option<String> {
    for codes in [
        NOT_FOUND_CODES,
        ALREADY_EXISTS_CODES,
        THROTTLING_CODES,
        DEPENDENCY_CODES,
    ] {
        for code in codes {
            if debug_str.contains(code) {
                return Some((*code).to_string());
            }
        }
    }

    // Fall back to the `code: Some("...")` field the SDK debug format carries
    if let Some(start) = debug_str.find("code: Some(\"") {
        let rest = &debug_str[start + 12..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_codes() {
        for code in NOT_FOUND_CODES {
            let err = classify_aws_error(Some(code), Some("some message"));
            assert!(err.is_not_found(), "expected NotFound for code: {code}");
        }
    }

    #[test]
    fn already_exists_codes() {
        for code in ALREADY_EXISTS_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert!(
                err.is_already_exists(),
                "expected AlreadyExists for code: {code}"
            );
        }
    }

    #[test]
    fn throttling_codes_are_retryable() {
        for code in THROTTLING_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert!(err.is_retryable(), "expected retryable for code: {code}");
            assert!(matches!(err, AwsError::Throttled));
        }
    }

    #[test]
    fn dependency_violation_is_retryable() {
        let err = classify_aws_error(Some("DependencyViolation"), Some("ENI attached"));
        assert!(err.is_retryable());
        assert!(matches!(err, AwsError::DependencyViolation));
    }

    #[test]
    fn iam_propagation_delay() {
        let err = classify_aws_error(
            Some("InvalidParameterValue"),
            Some("Value for parameter role is invalid"),
        );
        assert!(matches!(err, AwsError::IamPropagationDelay));
        assert!(err.is_retryable());

        let err2 = classify_aws_error(
            Some("ClientException"),
            Some("ECS was unable to assume the role"),
        );
        assert!(matches!(err2, AwsError::IamPropagationDelay));
    }

    #[test]
    fn unknown_and_missing_codes() {
        let err = classify_aws_error(Some("SomeNewError"), Some("details"));
        assert!(matches!(err, AwsError::Sdk { .. }));

        let err2 = classify_aws_error(None, Some("something failed"));
        assert!(matches!(err2, AwsError::Sdk { code: None, .. }));
    }

    #[test]
    fn extract_code_from_debug_string() {
        let debug_str =
            r#"SdkError { code: Some("RepositoryNotFoundException"), message: "fail" }"#;
        assert_eq!(
            extract_error_code(debug_str).as_deref(),
            Some("RepositoryNotFoundException")
        );

        let generic = r#"SdkError { code: Some("SomeRandomCode"), message: "fail" }"#;
        assert_eq!(extract_error_code(generic).as_deref(), Some("SomeRandomCode"));

        assert!(extract_error_code("connection refused").is_none());
    }
}
