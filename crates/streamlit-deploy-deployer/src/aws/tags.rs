//! Per-service tag builders
//!
//! Each AWS service models tags with its own type; these helpers stamp the
//! standard streamlit-deploy tag set onto whichever shape the service wants.

use anyhow::Result;
use streamlit_deploy_common::tags::{
    format_created_at, TAG_APP, TAG_CREATED_AT, TAG_ENVIRONMENT, TAG_TOOL, TAG_TOOL_VALUE,
};

/// The standard tag set as plain key/value pairs
pub fn standard_tags(app: &str, environment: &str) -> Vec<(String, String)> {
    vec![
        (TAG_TOOL.to_string(), TAG_TOOL_VALUE.to_string()),
        (TAG_APP.to_string(), app.to_string()),
        (TAG_ENVIRONMENT.to_string(), environment.to_string()),
        (
            TAG_CREATED_AT.to_string(),
            format_created_at(chrono::Utc::now()),
        ),
    ]
}

/// Build an EC2 TagSpecification with standard tags plus optional extras
/// (e.g. a Name tag).
pub fn ec2_tag_spec(
    resource_type: aws_sdk_ec2::types::ResourceType,
    app: &str,
    environment: &str,
    extra_tags: &[(&str, &str)],
) -> aws_sdk_ec2::types::TagSpecification {
    use aws_sdk_ec2::types::{Tag, TagSpecification};

    let mut builder = TagSpecification::builder().resource_type(resource_type);
    for (k, v) in standard_tags(app, environment) {
        builder = builder.tags(Tag::builder().key(k).value(v).build());
    }
    for (k, v) in extra_tags {
        builder = builder.tags(Tag::builder().key(*k).value(*v).build());
    }
    builder.build()
}

/// Standard tags as ECR tag values
pub fn ecr_tags(app: &str, environment: &str) -> Result<Vec<aws_sdk_ecr::types::Tag>> {
    standard_tags(app, environment)
        .into_iter()
        .map(|(k, v)| {
            aws_sdk_ecr::types::Tag::builder()
                .key(k)
                .value(v)
                .build()
                .map_err(anyhow::Error::from)
        })
        .collect()
}

/// Standard tags as ELBv2 tag values
pub fn elb_tags(
    app: &str,
    environment: &str,
) -> Result<Vec<aws_sdk_elasticloadbalancingv2::types::Tag>> {
    standard_tags(app, environment)
        .into_iter()
        .map(|(k, v)| {
            aws_sdk_elasticloadbalancingv2::types::Tag::builder()
                .key(k)
                .value(v)
                .build()
                .map_err(anyhow::Error::from)
        })
        .collect()
}

/// Standard tags as ECS tag values
pub fn ecs_tags(app: &str, environment: &str) -> Vec<aws_sdk_ecs::types::Tag> {
    standard_tags(app, environment)
        .into_iter()
        .map(|(k, v)| aws_sdk_ecs::types::Tag::builder().key(k).value(v).build())
        .collect()
}

/// Standard tags as IAM tag values
pub fn iam_tags(app: &str, environment: &str) -> Result<Vec<aws_sdk_iam::types::Tag>> {
    standard_tags(app, environment)
        .into_iter()
        .map(|(k, v)| {
            aws_sdk_iam::types::Tag::builder()
                .key(k)
                .value(v)
                .build()
                .map_err(anyhow::Error::from)
        })
        .collect()
}

/// Standard tags as App Runner tag values
pub fn apprunner_tags(app: &str, environment: &str) -> Vec<aws_sdk_apprunner::types::Tag> {
    standard_tags(app, environment)
        .into_iter()
        .map(|(k, v)| {
            aws_sdk_apprunner::types::Tag::builder()
                .key(k)
                .value(v)
                .build()
        })
        .collect()
}

/// Standard tags as a CloudFront tag list
pub fn cloudfront_tags(app: &str, environment: &str) -> Result<aws_sdk_cloudfront::types::Tags> {
    let items = standard_tags(app, environment)
        .into_iter()
        .map(|(k, v)| {
            aws_sdk_cloudfront::types::Tag::builder()
                .key(k)
                .value(v)
                .build()
                .map_err(anyhow::Error::from)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(aws_sdk_cloudfront::types::Tags::builder()
        .set_items(Some(items))
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_tag_set_is_complete() {
        let tags = standard_tags("demo", "dev");
        let keys: Vec<&str> = tags.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&TAG_TOOL));
        assert!(keys.contains(&TAG_APP));
        assert!(keys.contains(&TAG_ENVIRONMENT));
        assert!(keys.contains(&TAG_CREATED_AT));
    }

    #[test]
    fn app_and_environment_values_are_carried() {
        let tags = standard_tags("demo", "staging");
        assert!(tags.contains(&(TAG_APP.to_string(), "demo".to_string())));
        assert!(tags.contains(&(TAG_ENVIRONMENT.to_string(), "staging".to_string())));
    }
}
