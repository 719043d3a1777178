//! Network integration tests - actually call AWS APIs
//!
//! These tests are marked `#[ignore]` and only run with:
//! ```
//! AWS_PROFILE=your_profile cargo test --test aws_network_integration -- --ignored
//! ```

mod aws_test_helpers;

use aws_test_helpers::*;
use streamlit_deploy_common::ResourceNames;
use streamlit_deploy_deployer::aws::NetworkClient;

/// VPC layout create/reuse/delete lifecycle
#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn create_reuse_and_delete_network() {
    let region = get_test_region();
    let client = NetworkClient::new(&region)
        .await
        .expect("AWS credentials required - set AWS_PROFILE or AWS_ACCESS_KEY_ID");

    let environment = test_suffix();
    let names = ResourceNames::new("it-app", &environment);

    let network = client
        .ensure_network(&names, "it-app", &environment)
        .await
        .expect("Should create network");
    assert_eq!(network.subnet_ids.len(), 2, "two public subnets expected");

    // A second run finds the tagged VPC instead of creating another
    let reused = client
        .ensure_network(&names, "it-app", &environment)
        .await
        .expect("Should reuse network");
    assert_eq!(reused.vpc_id, network.vpc_id);

    client
        .delete_network(&network.vpc_id)
        .await
        .expect("Should delete network");

    let found = client
        .find_tagged_vpc("it-app", &environment)
        .await
        .expect("Lookup should succeed");
    assert!(found.is_none(), "VPC should be gone after delete");
}

/// Security group graph create/delete lifecycle
#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn security_group_graph_lifecycle() {
    let region = get_test_region();
    let client = NetworkClient::new(&region)
        .await
        .expect("AWS credentials required");

    let environment = test_suffix();
    let names = ResourceNames::new("it-app", &environment);

    let network = client
        .ensure_network(&names, "it-app", &environment)
        .await
        .expect("Should create network");

    let groups = client
        .ensure_security_groups(&names, &network.vpc_id, 8501, "it-app", &environment)
        .await
        .expect("Should create security groups");
    assert_ne!(groups.alb_sg_id, groups.service_sg_id);

    // Re-running adopts both groups
    let adopted = client
        .ensure_security_groups(&names, &network.vpc_id, 8501, "it-app", &environment)
        .await
        .expect("Should adopt existing groups");
    assert_eq!(adopted.alb_sg_id, groups.alb_sg_id);
    assert_eq!(adopted.service_sg_id, groups.service_sg_id);

    client
        .delete_security_group(&groups.service_sg_id)
        .await
        .expect("Should delete service group");
    client
        .delete_security_group(&groups.alb_sg_id)
        .await
        .expect("Should delete alb group");
    client
        .delete_network(&network.vpc_id)
        .await
        .expect("Should delete network");
}
