//! Edge distribution fronting the load balancer
//!
//! The distribution forwards every method, cookie, header, and query string
//! to the load balancer unmodified - caching is disabled because the hosted
//! application is stateful and session-bound - and injects the
//! origin-verification header on every request toward the origin. A small
//! viewer-request function answers OPTIONS preflights at the edge so the
//! session-bound origin never sees them.

use crate::aws::context::AwsContext;
use crate::aws::error::{classify_sdk_error, ignore_not_found};
use crate::aws::tags::cloudfront_tags;
use crate::wait::{wait_for_resource, WaitConfig};
use anyhow::{Context, Result};
use aws_sdk_cloudfront::types::{
    AllowedMethods, CachedMethods, CustomHeaders, CustomOriginConfig, DefaultCacheBehavior,
    DistributionConfig, DistributionConfigWithTags, EventType, FunctionAssociation,
    FunctionAssociations, FunctionConfig, FunctionRuntime, Method, Origin, OriginCustomHeader,
    OriginProtocolPolicy, Origins, ViewerProtocolPolicy,
};
use aws_sdk_cloudfront::Client;
use streamlit_deploy_common::{ResourceNames, TrafficGate};
use tracing::{debug, info};

/// Managed cache policy "CachingDisabled": no edge caching at all
const CACHING_DISABLED_POLICY_ID: &str = "4135ea2d-6df8-44a3-9df3-4b5a84be39ad";

/// Managed origin request policy "AllViewerExceptHostHeader": every viewer
/// cookie, header, and query string is forwarded to the origin
const ALL_VIEWER_ORIGIN_REQUEST_POLICY_ID: &str = "b689b0a8-53d0-40ab-baf2-68738e2966ac";

/// Origin id used inside the distribution config
const ORIGIN_ID: &str = "load-balancer-origin";

/// A provisioned distribution
#[derive(Debug, Clone)]
pub struct DistributionRef {
    pub id: String,
    pub domain_name: String,
}

/// CloudFront client for the edge unit
pub struct EdgeClient {
    client: Client,
}

impl EdgeClient {
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.cloudfront_client(),
        }
    }

    /// Create and publish the preflight-answering function, updating the
    /// code in place when the function already exists. Returns the ARN of
    /// the published version.
    pub async fn ensure_preflight_function(&self, name: &str) -> Result<String> {
        let config = FunctionConfig::builder()
            .comment("Answer OPTIONS preflights at the edge")
            .runtime(FunctionRuntime::CloudfrontJs10)
            .build()
            .context("Failed to build function config")?;

        let create = self
            .client
            .create_function()
            .name(name)
            .function_config(config.clone())
            .function_code(aws_sdk_cloudfront::primitives::Blob::new(
                preflight_function_code().as_bytes(),
            ))
            .send()
            .await;

        let etag = match create {
            Ok(output) => {
                debug!(function = %name, "Edge function created");
                output.e_tag().context("No ETag in create response")?.to_string()
            }
            Err(err) if classify_sdk_error(&err).is_already_exists() => {
                let described = self
                    .client
                    .describe_function()
                    .name(name)
                    .send()
                    .await
                    .context("Failed to describe existing edge function")?;
                let etag = described
                    .e_tag()
                    .context("No ETag in describe response")?
                    .to_string();
                let updated = self
                    .client
                    .update_function()
                    .name(name)
                    .if_match(&etag)
                    .function_config(config)
                    .function_code(aws_sdk_cloudfront::primitives::Blob::new(
                        preflight_function_code().as_bytes(),
                    ))
                    .send()
                    .await
                    .context("Failed to update edge function")?;
                debug!(function = %name, "Edge function updated");
                updated
                    .e_tag()
                    .context("No ETag in update response")?
                    .to_string()
            }
            Err(err) => return Err(err).context("Failed to create edge function"),
        };

        let published = self
            .client
            .publish_function()
            .name(name)
            .if_match(etag)
            .send()
            .await
            .context("Failed to publish edge function")?;

        let arn = published
            .function_summary()
            .map(|s| s.function_metadata().function_arn().to_string())
            .context("No function summary in publish response")?;

        info!(function = %name, arn = %arn, "Edge function published");
        Ok(arn)
    }

    /// Create the distribution in front of the load balancer, or adopt the
    /// one already carrying the deployment's comment.
    pub async fn ensure_distribution(
        &self,
        names: &ResourceNames,
        alb_dns_name: &str,
        gate: &TrafficGate,
        function_arn: &str,
        app: &str,
        environment: &str,
    ) -> Result<DistributionRef> {
        if let Some(existing) = self.find_distribution(names).await? {
            info!(id = %existing.id, "Reusing existing distribution");
            return Ok(existing);
        }

        info!(origin = %alb_dns_name, "Creating edge distribution");

        let config = distribution_config(names, alb_dns_name, gate, function_arn)?;
        let with_tags = DistributionConfigWithTags::builder()
            .distribution_config(config)
            .tags(cloudfront_tags(app, environment)?)
            .build()
            .context("Failed to build distribution config")?;

        let created = self
            .client
            .create_distribution_with_tags()
            .distribution_config_with_tags(with_tags)
            .send()
            .await
            .context("Failed to create distribution")?;

        let distribution = created
            .distribution()
            .context("No distribution in response")?;
        let reference = DistributionRef {
            id: distribution.id().to_string(),
            domain_name: distribution.domain_name().to_string(),
        };

        info!(id = %reference.id, domain = %reference.domain_name, "Distribution created");
        Ok(reference)
    }

    /// Find the deployment's distribution by its comment.
    pub async fn find_distribution(
        &self,
        names: &ResourceNames,
    ) -> Result<Option<DistributionRef>> {
        let comment = names.distribution_comment();
        let mut marker: Option<String> = None;

        loop {
            let mut request = self.client.list_distributions();
            if let Some(m) = &marker {
                request = request.marker(m);
            }
            let listed = request
                .send()
                .await
                .context("Failed to list distributions")?;

            let Some(list) = listed.distribution_list() else {
                return Ok(None);
            };

            for summary in list.items() {
                if summary.comment() == comment.as_str() {
                    return Ok(Some(DistributionRef {
                        id: summary.id().to_string(),
                        domain_name: summary.domain_name().to_string(),
                    }));
                }
            }

            if list.is_truncated() {
                marker = list.next_marker().map(|m| m.to_string());
            } else {
                return Ok(None);
            }
        }
    }

    /// Wait until the distribution has rolled out to every edge location.
    pub async fn wait_for_deployed(&self, distribution_id: &str) -> Result<()> {
        info!(id = %distribution_id, "Waiting for distribution rollout (can take many minutes)");
        let client = self.client.clone();
        let id = distribution_id.to_string();

        wait_for_resource(
            WaitConfig::slow_rollout(),
            None,
            || {
                let c = client.clone();
                let id = id.clone();
                async move {
                    let described = c
                        .get_distribution()
                        .id(&id)
                        .send()
                        .await
                        .context("Failed to get distribution")?;
                    Ok(described
                        .distribution()
                        .map(|d| d.status() == "Deployed")
                        .unwrap_or(false))
                }
            },
            "edge distribution",
        )
        .await
    }

    /// Disable, wait out the rollout, and delete the distribution.
    /// Returns Ok(()) if it doesn't exist.
    pub async fn delete_distribution(&self, names: &ResourceNames) -> Result<()> {
        let Some(reference) = self.find_distribution(names).await? else {
            debug!("Distribution already deleted");
            return Ok(());
        };

        let config = self
            .client
            .get_distribution_config()
            .id(&reference.id)
            .send()
            .await
            .context("Failed to get distribution config")?;
        let etag = config
            .e_tag()
            .context("No ETag on distribution config")?
            .to_string();
        let mut dist_config = config
            .distribution_config()
            .cloned()
            .context("No distribution config in response")?;

        if dist_config.enabled {
            info!(id = %reference.id, "Disabling distribution before deletion");
            dist_config.enabled = false;
            let updated = self
                .client
                .update_distribution()
                .id(&reference.id)
                .if_match(&etag)
                .distribution_config(dist_config)
                .send()
                .await
                .context("Failed to disable distribution")?;
            let etag = updated
                .e_tag()
                .context("No ETag after disable")?
                .to_string();

            self.wait_for_deployed(&reference.id).await?;

            let result = self
                .client
                .delete_distribution()
                .id(&reference.id)
                .if_match(&etag)
                .send()
                .await;
            ignore_not_found(result).context("Failed to delete distribution")?;
        } else {
            let result = self
                .client
                .delete_distribution()
                .id(&reference.id)
                .if_match(&etag)
                .send()
                .await;
            ignore_not_found(result).context("Failed to delete distribution")?;
        }

        info!(id = %reference.id, "Distribution deleted");
        Ok(())
    }

    /// Delete the preflight function. Returns Ok(()) if it doesn't exist.
    pub async fn delete_function(&self, name: &str) -> Result<()> {
        let described = self.client.describe_function().name(name).send().await;
        let described = match ignore_not_found(described)? {
            Some(d) => d,
            None => {
                debug!(function = %name, "Edge function already deleted");
                return Ok(());
            }
        };
        let etag = described
            .e_tag()
            .context("No ETag in describe response")?
            .to_string();

        let result = self
            .client
            .delete_function()
            .name(name)
            .if_match(etag)
            .send()
            .await;
        ignore_not_found(result).context("Failed to delete edge function")?;
        info!(function = %name, "Edge function deleted");
        Ok(())
    }

    /// Current rollout status, for status reporting.
    pub async fn distribution_status(&self, names: &ResourceNames) -> Result<Option<String>> {
        let Some(reference) = self.find_distribution(names).await? else {
            return Ok(None);
        };
        let described = self
            .client
            .get_distribution()
            .id(&reference.id)
            .send()
            .await
            .context("Failed to get distribution")?;
        Ok(described.distribution().map(|d| d.status().to_string()))
    }
}

/// The load balancer origin: reached over plain HTTP, with the
/// origin-verification header injected on every edge-to-origin request.
fn gate_origin(alb_dns_name: &str, gate: &TrafficGate) -> Result<Origin> {
    Origin::builder()
        .id(ORIGIN_ID)
        .domain_name(alb_dns_name)
        .custom_headers(
            CustomHeaders::builder()
                .quantity(1)
                .items(
                    OriginCustomHeader::builder()
                        .header_name(gate.header_name())
                        .header_value(gate.header_value())
                        .build()
                        .context("Failed to build origin header")?,
                )
                .build()
                .context("Failed to build origin headers")?,
        )
        .custom_origin_config(
            CustomOriginConfig::builder()
                .http_port(80)
                .https_port(443)
                .origin_protocol_policy(OriginProtocolPolicy::HttpOnly)
                .build()
                .context("Failed to build origin config")?,
        )
        .build()
        .context("Failed to build origin")
}

/// The default behavior: caching off, every method allowed, every viewer
/// cookie/header/query forwarded, preflights answered at the edge.
fn edge_behavior(function_arn: &str) -> Result<DefaultCacheBehavior> {
    let all_methods = [
        Method::Get,
        Method::Head,
        Method::Options,
        Method::Put,
        Method::Post,
        Method::Patch,
        Method::Delete,
    ];

    DefaultCacheBehavior::builder()
        .target_origin_id(ORIGIN_ID)
        .viewer_protocol_policy(ViewerProtocolPolicy::RedirectToHttps)
        .cache_policy_id(CACHING_DISABLED_POLICY_ID)
        .origin_request_policy_id(ALL_VIEWER_ORIGIN_REQUEST_POLICY_ID)
        .allowed_methods(
            AllowedMethods::builder()
                .quantity(all_methods.len() as i32)
                .set_items(Some(all_methods.to_vec()))
                .cached_methods(
                    CachedMethods::builder()
                        .quantity(2)
                        .items(Method::Get)
                        .items(Method::Head)
                        .build()
                        .context("Failed to build cached methods")?,
                )
                .build()
                .context("Failed to build allowed methods")?,
        )
        .function_associations(
            FunctionAssociations::builder()
                .quantity(1)
                .items(
                    FunctionAssociation::builder()
                        .function_arn(function_arn)
                        .event_type(EventType::ViewerRequest)
                        .build()
                        .context("Failed to build function association")?,
                )
                .build()
                .context("Failed to build function associations")?,
        )
        .build()
        .context("Failed to build cache behavior")
}

/// Build the full distribution config from the origin and behavior.
fn distribution_config(
    names: &ResourceNames,
    alb_dns_name: &str,
    gate: &TrafficGate,
    function_arn: &str,
) -> Result<DistributionConfig> {
    DistributionConfig::builder()
        .caller_reference(names.distribution_caller_reference())
        .comment(names.distribution_comment())
        .enabled(true)
        .origins(
            Origins::builder()
                .quantity(1)
                .items(gate_origin(alb_dns_name, gate)?)
                .build()
                .context("Failed to build origins")?,
        )
        .default_cache_behavior(edge_behavior(function_arn)?)
        .build()
        .context("Failed to build distribution config")
}

/// Source of the viewer-request function: answer OPTIONS preflights with a
/// permissive 204 instead of forwarding them to the origin. An optimization
/// for the session-bound origin, not a security boundary.
pub fn preflight_function_code() -> &'static str {
    r#"function handler(event) {
    var request = event.request;
    if (request.method === 'OPTIONS') {
        return {
            statusCode: 204,
            statusDescription: 'No Content',
            headers: {
                'access-control-allow-origin': { value: '*' },
                'access-control-allow-headers': { value: '*' }
            }
        };
    }
    return request;
}
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    const FUNCTION_ARN: &str = "arn:aws:cloudfront::123456789012:function/demo-dev-preflight";

    #[test]
    fn origin_injects_the_gate_header() {
        let origin = gate_origin(
            "demo-alb.eu-west-1.elb.amazonaws.com",
            &TrafficGate::for_app("demo"),
        )
        .unwrap();
        let headers = origin.custom_headers().unwrap().items();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].header_name(), "X-Verify-Origin");
        assert_eq!(
            headers[0].header_value(),
            "demo-StreamlitCloudFrontDistribution"
        );
    }

    #[test]
    fn origin_is_reached_over_http() {
        let origin = gate_origin("alb.example.com", &TrafficGate::for_app("demo")).unwrap();
        let origin_config = origin.custom_origin_config().unwrap();
        assert_eq!(
            origin_config.origin_protocol_policy(),
            &OriginProtocolPolicy::HttpOnly
        );
        assert_eq!(origin_config.http_port(), 80);
    }

    #[test]
    fn caching_is_disabled_and_everything_forwarded() {
        let behavior = edge_behavior(FUNCTION_ARN).unwrap();
        assert_eq!(behavior.cache_policy_id(), Some(CACHING_DISABLED_POLICY_ID));
        assert_eq!(
            behavior.origin_request_policy_id(),
            Some(ALL_VIEWER_ORIGIN_REQUEST_POLICY_ID)
        );

        let allowed = behavior.allowed_methods().unwrap();
        assert_eq!(allowed.quantity(), 7);
    }

    #[test]
    fn viewers_are_forced_onto_https() {
        let behavior = edge_behavior(FUNCTION_ARN).unwrap();
        assert_eq!(
            behavior.viewer_protocol_policy(),
            &ViewerProtocolPolicy::RedirectToHttps
        );
    }

    #[test]
    fn preflight_function_answers_options_with_permissive_cors() {
        let code = preflight_function_code();
        assert!(code.contains("request.method === 'OPTIONS'"));
        assert!(code.contains("statusCode: 204"));
        assert!(code.contains("'access-control-allow-origin': { value: '*' }"));
        assert!(code.contains("'access-control-allow-headers': { value: '*' }"));
    }

    #[test]
    fn preflight_function_attaches_on_viewer_request() {
        let behavior = edge_behavior(FUNCTION_ARN).unwrap();
        let associations = behavior.function_associations().unwrap();
        assert_eq!(associations.quantity(), 1);
        assert_eq!(
            associations.items()[0].event_type(),
            &EventType::ViewerRequest
        );
    }

    #[test]
    fn config_carries_deterministic_identity() {
        let config = distribution_config(
            &ResourceNames::new("demo", "dev"),
            "alb.example.com",
            &TrafficGate::for_app("demo"),
            FUNCTION_ARN,
        )
        .unwrap();
        assert_eq!(config.caller_reference(), "streamlit-deploy-demo-dev");
        assert_eq!(config.comment(), "demo-dev-edge");
        assert!(config.enabled());
    }
}
