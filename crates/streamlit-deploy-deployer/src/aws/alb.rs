//! Load balancer management and the origin-verification listener rules
//!
//! In the edge-fronted topology the listener carries two ordered rules:
//! priority 1 forwards to the service only when the origin-verification
//! header matches exactly, and the default action permanently redirects
//! everything else to the edge domain. Direct requests to the load
//! balancer's public address therefore never reach the application.

use crate::aws::context::AwsContext;
use crate::aws::error::{classify_anyhow_error, classify_sdk_error, ignore_not_found};
use crate::aws::tags::elb_tags;
use crate::wait::{wait_for_resource, WaitConfig};
use anyhow::{Context, Result};
use aws_sdk_elasticloadbalancingv2::types::{
    Action, ActionTypeEnum, ForwardActionConfig, HttpHeaderConditionConfig, IpAddressType,
    LoadBalancerSchemeEnum, LoadBalancerStateEnum, LoadBalancerTypeEnum, Matcher, ProtocolEnum,
    RedirectActionConfig, RedirectActionStatusCodeEnum, RuleCondition, TargetGroupTuple,
    TargetTypeEnum,
};
use aws_sdk_elasticloadbalancingv2::Client;
use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;
use streamlit_deploy_common::defaults::{
    ALB_PORT, GATE_RULE_PRIORITY, HEALTHY_HTTP_CODES, HEALTH_CHECK_INTERVAL_SECS,
    HEALTH_CHECK_PATH,
};
use streamlit_deploy_common::TrafficGate;
use tracing::{debug, info, warn};

/// A provisioned load balancer
#[derive(Debug, Clone)]
pub struct LoadBalancerRef {
    pub arn: String,
    pub dns_name: String,
}

/// ELBv2 client for the orchestrated topology's load balancer
pub struct AlbClient {
    client: Client,
}

impl AlbClient {
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.elb_client(),
        }
    }

    /// Create the internet-facing load balancer, adopting an existing one
    /// with the same name.
    pub async fn ensure_load_balancer(
        &self,
        name: &str,
        subnet_ids: &[String],
        alb_sg_id: &str,
        app: &str,
        environment: &str,
    ) -> Result<LoadBalancerRef> {
        info!(name = %name, "Ensuring load balancer");

        let create = self
            .client
            .create_load_balancer()
            .name(name)
            .set_subnets(Some(subnet_ids.to_vec()))
            .security_groups(alb_sg_id)
            .scheme(LoadBalancerSchemeEnum::InternetFacing)
            .r#type(LoadBalancerTypeEnum::Application)
            .ip_address_type(IpAddressType::Ipv4)
            .set_tags(Some(elb_tags(app, environment)?))
            .send()
            .await;

        let lb = match create {
            Ok(output) => output.load_balancers().first().cloned(),
            Err(err) if classify_sdk_error(&err).is_already_exists() => {
                debug!(name = %name, "Load balancer already exists, adopting");
                let described = self
                    .client
                    .describe_load_balancers()
                    .names(name)
                    .send()
                    .await
                    .context("Failed to describe existing load balancer")?;
                described.load_balancers().first().cloned()
            }
            Err(err) => return Err(err).context("Failed to create load balancer"),
        };

        let lb = lb.context("No load balancer in response")?;
        let reference = LoadBalancerRef {
            arn: lb
                .load_balancer_arn()
                .context("Load balancer has no ARN")?
                .to_string(),
            dns_name: lb
                .dns_name()
                .context("Load balancer has no DNS name")?
                .to_string(),
        };

        self.wait_until_active(&reference.arn).await?;
        info!(arn = %reference.arn, dns = %reference.dns_name, "Load balancer ready");
        Ok(reference)
    }

    async fn wait_until_active(&self, lb_arn: &str) -> Result<()> {
        let client = self.client.clone();
        let arn = lb_arn.to_string();
        wait_for_resource(
            WaitConfig::default(),
            None,
            || {
                let c = client.clone();
                let arn = arn.clone();
                async move {
                    let described = c
                        .describe_load_balancers()
                        .load_balancer_arns(&arn)
                        .send()
                        .await
                        .context("Failed to describe load balancer")?;
                    Ok(described
                        .load_balancers()
                        .first()
                        .and_then(|lb| lb.state())
                        .and_then(|s| s.code())
                        .map(|code| *code == LoadBalancerStateEnum::Active)
                        .unwrap_or(false))
                }
            },
            "load balancer",
        )
        .await
    }

    /// Create the target group with the topology's health check policy,
    /// adopting an existing one with the same name.
    pub async fn ensure_target_group(
        &self,
        name: &str,
        vpc_id: &str,
        app: &str,
        environment: &str,
    ) -> Result<String> {
        info!(name = %name, "Ensuring target group");

        let create = self
            .client
            .create_target_group()
            .name(name)
            .protocol(ProtocolEnum::Http)
            .port(i32::from(ALB_PORT))
            .vpc_id(vpc_id)
            .target_type(TargetTypeEnum::Ip)
            .health_check_path(HEALTH_CHECK_PATH)
            .health_check_interval_seconds(HEALTH_CHECK_INTERVAL_SECS)
            // Wide on purpose: the app answers its root path with an
            // unauthenticated-but-alive status
            .matcher(Matcher::builder().http_code(HEALTHY_HTTP_CODES).build())
            .set_tags(Some(elb_tags(app, environment)?))
            .send()
            .await;

        let arn = match create {
            Ok(output) => output
                .target_groups()
                .first()
                .and_then(|tg| tg.target_group_arn())
                .map(|arn| arn.to_string()),
            Err(err) if classify_sdk_error(&err).is_already_exists() => {
                debug!(name = %name, "Target group already exists, adopting");
                let described = self
                    .client
                    .describe_target_groups()
                    .names(name)
                    .send()
                    .await
                    .context("Failed to describe existing target group")?;
                described
                    .target_groups()
                    .first()
                    .and_then(|tg| tg.target_group_arn())
                    .map(|arn| arn.to_string())
            }
            Err(err) => return Err(err).context("Failed to create target group"),
        };

        arn.context("No target group ARN in response")
    }

    /// Create the HTTP listener with a plain forward default, adopting an
    /// existing listener on the port. The forward default is replaced by the
    /// redirect once the edge layer exists.
    pub async fn ensure_listener(
        &self,
        lb_arn: &str,
        target_group_arn: &str,
        app: &str,
        environment: &str,
    ) -> Result<String> {
        let create = self
            .client
            .create_listener()
            .load_balancer_arn(lb_arn)
            .protocol(ProtocolEnum::Http)
            .port(i32::from(ALB_PORT))
            .default_actions(forward_action(target_group_arn)?)
            .set_tags(Some(elb_tags(app, environment)?))
            .send()
            .await;

        match create {
            Ok(output) => output
                .listeners()
                .first()
                .and_then(|l| l.listener_arn())
                .map(|arn| arn.to_string())
                .context("No listener ARN in response"),
            Err(err) if classify_sdk_error(&err).is_already_exists() => {
                debug!("Listener already exists, adopting");
                self.find_listener(lb_arn)
                    .await?
                    .context("Listener exists but was not found")
            }
            Err(err) => Err(err).context("Failed to create listener"),
        }
    }

    /// Find the deployment's HTTP listener on a load balancer.
    pub async fn find_listener(&self, lb_arn: &str) -> Result<Option<String>> {
        let described = self
            .client
            .describe_listeners()
            .load_balancer_arn(lb_arn)
            .send()
            .await
            .context("Failed to describe listeners")?;
        Ok(described
            .listeners()
            .iter()
            .find(|l| l.port() == Some(i32::from(ALB_PORT)))
            .and_then(|l| l.listener_arn())
            .map(|arn| arn.to_string()))
    }

    /// Install the traffic gate on the listener:
    ///
    /// - rule priority 1 forwards to the target group only when the
    ///   origin-verification header carries the exact expected value;
    /// - the default action becomes a permanent redirect to the edge domain
    ///   over HTTPS.
    ///
    /// Both sides of the gate receive the same [`TrafficGate`] value; the
    /// header is never re-typed here.
    pub async fn install_gate(
        &self,
        listener_arn: &str,
        gate: &TrafficGate,
        target_group_arn: &str,
        edge_domain: &str,
    ) -> Result<()> {
        info!(
            listener = %listener_arn,
            header = gate.header_name(),
            edge_domain = %edge_domain,
            "Installing origin-verification gate"
        );

        let conditions = gate_conditions(gate);
        let forward = forward_action(target_group_arn)?;

        // A re-run replaces the existing gate rule in place
        if let Some(rule_arn) = self.find_gate_rule(listener_arn).await? {
            self.client
                .modify_rule()
                .rule_arn(&rule_arn)
                .set_conditions(Some(conditions))
                .actions(forward)
                .send()
                .await
                .context("Failed to update gate rule")?;
            debug!(rule = %rule_arn, "Gate rule updated");
        } else {
            self.client
                .create_rule()
                .listener_arn(listener_arn)
                .priority(GATE_RULE_PRIORITY)
                .set_conditions(Some(conditions))
                .actions(forward)
                .send()
                .await
                .context("Failed to create gate rule")?;
            debug!("Gate rule created");
        }

        self.client
            .modify_listener()
            .listener_arn(listener_arn)
            .default_actions(redirect_to_edge_action(edge_domain)?)
            .send()
            .await
            .context("Failed to set redirect default action")?;

        info!("Origin-verification gate installed");
        Ok(())
    }

    /// Find the gate rule (priority 1) on a listener, if installed.
    pub async fn find_gate_rule(&self, listener_arn: &str) -> Result<Option<String>> {
        let rules = self
            .client
            .describe_rules()
            .listener_arn(listener_arn)
            .send()
            .await
            .context("Failed to describe listener rules")?;
        let gate_priority = GATE_RULE_PRIORITY.to_string();
        Ok(rules
            .rules()
            .iter()
            .find(|r| r.priority() == Some(gate_priority.as_str()))
            .and_then(|r| r.rule_arn())
            .map(|arn| arn.to_string()))
    }

    /// Delete the load balancer. Returns Ok(()) if it doesn't exist.
    pub async fn delete_load_balancer(&self, name: &str) -> Result<()> {
        let Some(lb) = self.find_load_balancer(name).await? else {
            debug!(name = %name, "Load balancer already deleted");
            return Ok(());
        };

        info!(name = %name, "Deleting load balancer");
        let result = self
            .client
            .delete_load_balancer()
            .load_balancer_arn(&lb.arn)
            .send()
            .await;
        ignore_not_found(result).context("Failed to delete load balancer")?;
        info!(name = %name, "Load balancer deleted");
        Ok(())
    }

    /// Delete the target group. Retries while the deleted load balancer is
    /// still releasing it.
    pub async fn delete_target_group(&self, name: &str) -> Result<()> {
        let described = self
            .client
            .describe_target_groups()
            .names(name)
            .send()
            .await;
        let arn = match ignore_not_found(described)? {
            Some(output) => match output
                .target_groups()
                .first()
                .and_then(|tg| tg.target_group_arn())
            {
                Some(arn) => arn.to_string(),
                None => return Ok(()),
            },
            None => {
                debug!(name = %name, "Target group already deleted");
                return Ok(());
            }
        };

        info!(name = %name, "Deleting target group");
        (|| async {
            let result = self
                .client
                .delete_target_group()
                .target_group_arn(&arn)
                .send()
                .await;
            ignore_not_found(result).context("Failed to delete target group")?;
            Ok(())
        })
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(5))
                .with_max_delay(Duration::from_secs(30))
                .with_max_times(5),
        )
        .when(|e| classify_anyhow_error(e).is_retryable())
        .notify(|e, dur| {
            warn!(name = %name, delay = ?dur, error = %e, "Target group deletion failed, retrying...");
        })
        .await
    }

    /// Find a load balancer by name, if it exists.
    pub async fn find_load_balancer(&self, name: &str) -> Result<Option<LoadBalancerRef>> {
        let described = self
            .client
            .describe_load_balancers()
            .names(name)
            .send()
            .await;
        let described = match ignore_not_found(described)? {
            Some(d) => d,
            None => return Ok(None),
        };
        Ok(described.load_balancers().first().and_then(|lb| {
            Some(LoadBalancerRef {
                arn: lb.load_balancer_arn()?.to_string(),
                dns_name: lb.dns_name()?.to_string(),
            })
        }))
    }
}

/// The gate rule's match conditions: the origin-verification header must
/// carry the exact expected value.
pub fn gate_conditions(gate: &TrafficGate) -> Vec<RuleCondition> {
    vec![RuleCondition::builder()
        .field("http-header")
        .http_header_config(
            HttpHeaderConditionConfig::builder()
                .http_header_name(gate.header_name())
                .values(gate.header_value())
                .build(),
        )
        .build()]
}

/// Forward action to the service's target group.
pub fn forward_action(target_group_arn: &str) -> Result<Action> {
    Action::builder()
        .r#type(ActionTypeEnum::Forward)
        .target_group_arn(target_group_arn)
        .forward_config(
            ForwardActionConfig::builder()
                .target_groups(
                    TargetGroupTuple::builder()
                        .target_group_arn(target_group_arn)
                        .build(),
                )
                .build(),
        )
        .build()
        .context("Failed to build forward action")
}

/// Permanent redirect to the edge domain over HTTPS; the catch-all default
/// for requests that did not carry the gate header.
pub fn redirect_to_edge_action(edge_domain: &str) -> Result<Action> {
    Action::builder()
        .r#type(ActionTypeEnum::Redirect)
        .redirect_config(
            RedirectActionConfig::builder()
                .protocol("HTTPS")
                .port("443")
                .host(edge_domain)
                .status_code(RedirectActionStatusCodeEnum::Http301)
                .build()
                .context("Failed to build redirect config")?,
        )
        .build()
        .context("Failed to build redirect action")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_condition_matches_exact_header() {
        let gate = TrafficGate::for_app("demo");
        let conditions = gate_conditions(&gate);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].field(), Some("http-header"));

        let header = conditions[0].http_header_config().unwrap();
        assert_eq!(header.http_header_name(), Some("X-Verify-Origin"));
        assert_eq!(
            header.values(),
            ["demo-StreamlitCloudFrontDistribution".to_string()]
        );
    }

    #[test]
    fn forward_action_targets_the_service_group() {
        let action = forward_action("arn:tg/demo").unwrap();
        assert_eq!(action.r#type(), &ActionTypeEnum::Forward);
        assert_eq!(action.target_group_arn(), Some("arn:tg/demo"));
    }

    #[test]
    fn default_action_is_permanent_https_redirect_to_edge() {
        let action = redirect_to_edge_action("d123.cloudfront.net").unwrap();
        assert_eq!(action.r#type(), &ActionTypeEnum::Redirect);

        let redirect = action.redirect_config().unwrap();
        assert_eq!(redirect.protocol(), Some("HTTPS"));
        assert_eq!(redirect.port(), Some("443"));
        assert_eq!(redirect.host(), Some("d123.cloudfront.net"));
        assert_eq!(
            redirect.status_code(),
            &RedirectActionStatusCodeEnum::Http301
        );
    }

    #[test]
    fn gate_rule_priority_precedes_default() {
        // The gate rule must be evaluated before the catch-all default;
        // priority 1 is the lowest (first) priority the listener allows.
        assert_eq!(GATE_RULE_PRIORITY, 1);
    }
}
