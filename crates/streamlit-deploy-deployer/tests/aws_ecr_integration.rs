//! ECR integration tests - actually call AWS APIs
//!
//! These tests are marked `#[ignore]` and only run with:
//! ```
//! AWS_PROFILE=your_profile cargo test --test aws_ecr_integration -- --ignored
//! ```

mod aws_test_helpers;

use aws_test_helpers::*;
use streamlit_deploy_deployer::aws::EcrClient;

/// Repository create/adopt/delete lifecycle, including the lifecycle policy
#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn create_and_delete_repository() {
    let region = get_test_region();
    let client = EcrClient::new(&region)
        .await
        .expect("AWS credentials required - set AWS_PROFILE or AWS_ACCESS_KEY_ID");

    let name = format!("streamlit-deploy-{}", test_suffix());

    let reference = client
        .ensure_repository(&name, "it-app", "it")
        .await
        .expect("Should create repository");
    assert_eq!(reference.name, name);
    assert!(reference.uri.ends_with(&name), "URI should end with repo name");
    assert!(reference.arn.contains(&name));

    // Re-running adopts the existing repository instead of failing
    let adopted = client
        .ensure_repository(&name, "it-app", "it")
        .await
        .expect("Should adopt existing repository");
    assert_eq!(adopted.arn, reference.arn);

    assert!(client.repository_exists(&name).await);

    client
        .delete_repository(&name)
        .await
        .expect("Should delete repository");
    assert!(!client.repository_exists(&name).await);

    // Deleting again is a no-op
    client
        .delete_repository(&name)
        .await
        .expect("Second delete should be idempotent");
}

/// Registry authorization decodes into docker credentials
#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn authorization_yields_docker_credentials() {
    let region = get_test_region();
    let client = EcrClient::new(&region)
        .await
        .expect("AWS credentials required");

    let auth = client.authorization().await.expect("Should get auth token");
    assert_eq!(auth.username, "AWS");
    assert!(!auth.password.is_empty());
    assert!(auth.endpoint.starts_with("https://"));
}
