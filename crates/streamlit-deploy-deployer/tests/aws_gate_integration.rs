//! Listener gate integration tests - actually call AWS APIs
//!
//! Provisions a network and load balancer, installs the origin-verification
//! gate, and verifies the listener carries the gate rule. Only runs with:
//! ```
//! AWS_PROFILE=your_profile cargo test --test aws_gate_integration -- --ignored
//! ```

mod aws_test_helpers;

use aws_test_helpers::*;
use streamlit_deploy_common::{ResourceNames, TrafficGate};
use streamlit_deploy_deployer::aws::{AlbClient, NetworkClient};

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn gate_rule_and_redirect_install_on_listener() {
    let region = get_test_region();
    let environment = test_suffix();
    let names = ResourceNames::new("it-app", &environment);
    let gate = TrafficGate::for_app("it-app");

    let network = NetworkClient::new(&region)
        .await
        .expect("AWS credentials required - set AWS_PROFILE or AWS_ACCESS_KEY_ID");
    let network_ref = network
        .ensure_network(&names, "it-app", &environment)
        .await
        .expect("Should create network");
    let groups = network
        .ensure_security_groups(&names, &network_ref.vpc_id, 8501, "it-app", &environment)
        .await
        .expect("Should create security groups");

    let alb = AlbClient::new(&region).await.expect("client");
    let load_balancer = alb
        .ensure_load_balancer(
            &names.load_balancer(),
            &network_ref.subnet_ids,
            &groups.alb_sg_id,
            "it-app",
            &environment,
        )
        .await
        .expect("Should create load balancer");
    let target_group_arn = alb
        .ensure_target_group(&names.target_group(), &network_ref.vpc_id, "it-app", &environment)
        .await
        .expect("Should create target group");
    let listener_arn = alb
        .ensure_listener(&load_balancer.arn, &target_group_arn, "it-app", &environment)
        .await
        .expect("Should create listener");

    // Before the gate: no priority-1 rule
    assert!(alb
        .find_gate_rule(&listener_arn)
        .await
        .expect("describe rules")
        .is_none());

    alb.install_gate(
        &listener_arn,
        &gate,
        &target_group_arn,
        "d1234abcd.cloudfront.net",
    )
    .await
    .expect("Should install gate");

    assert!(alb
        .find_gate_rule(&listener_arn)
        .await
        .expect("describe rules")
        .is_some());

    // Re-installing updates the rule in place instead of failing on the
    // occupied priority
    alb.install_gate(
        &listener_arn,
        &gate,
        &target_group_arn,
        "d1234abcd.cloudfront.net",
    )
    .await
    .expect("Gate install should be idempotent");

    // Cleanup in reverse dependency order
    alb.delete_load_balancer(&names.load_balancer())
        .await
        .expect("Should delete load balancer");
    alb.delete_target_group(&names.target_group())
        .await
        .expect("Should delete target group");
    network
        .delete_security_group(&groups.service_sg_id)
        .await
        .expect("Should delete service group");
    network
        .delete_security_group(&groups.alb_sg_id)
        .await
        .expect("Should delete alb group");
    network
        .delete_network(&network_ref.vpc_id)
        .await
        .expect("Should delete network");
}
