//! Network management: dedicated VPC and the security-group graph
//!
//! The deployment runs in its own VPC with the fixed default layout: two
//! public subnets across the first two availability zones, an internet
//! gateway, and a default route. The security-group graph admits public
//! traffic only at the load balancer; the service accepts traffic solely
//! from the load balancer's group and from itself.

use crate::aws::context::AwsContext;
use crate::aws::error::{classify_anyhow_error, classify_sdk_error, ignore_not_found};
use crate::aws::tags::ec2_tag_spec;
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{AttributeBooleanValue, Filter, IpPermission, IpRange, ResourceType, UserIdGroupPair};
use aws_sdk_ec2::Client;
use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;
use streamlit_deploy_common::defaults::{ALB_PORT, SUBNET_CIDRS, VPC_CIDR};
use streamlit_deploy_common::tags::{TAG_APP, TAG_ENVIRONMENT, TAG_TOOL, TAG_TOOL_VALUE};
use streamlit_deploy_common::ResourceNames;
use tracing::{debug, info, warn};

/// A provisioned network, shared read-only with the compute unit
#[derive(Debug, Clone)]
pub struct NetworkRef {
    pub vpc_id: String,
    pub subnet_ids: Vec<String>,
}

/// The two security groups of the orchestrated topology
#[derive(Debug, Clone)]
pub struct SecurityGroupPair {
    pub alb_sg_id: String,
    pub service_sg_id: String,
}

/// EC2 client for managing the deployment's network
pub struct NetworkClient {
    client: Client,
}

impl NetworkClient {
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ec2_client(),
        }
    }

    /// Create the deployment's VPC if it does not exist yet, or adopt the
    /// one already carrying the deployment's tags.
    pub async fn ensure_network(
        &self,
        names: &ResourceNames,
        app: &str,
        environment: &str,
    ) -> Result<NetworkRef> {
        if let Some(existing) = self.find_tagged_vpc(app, environment).await? {
            debug!(vpc_id = %existing, "Reusing existing VPC");
            let subnet_ids = self.subnet_ids(&existing).await?;
            anyhow::ensure!(
                subnet_ids.len() >= 2,
                "Existing VPC {existing} has fewer than two subnets"
            );
            return Ok(NetworkRef {
                vpc_id: existing,
                subnet_ids,
            });
        }

        info!(name = %names.vpc(), cidr = VPC_CIDR, "Creating VPC");
        let created = self
            .client
            .create_vpc()
            .cidr_block(VPC_CIDR)
            .tag_specifications(ec2_tag_spec(
                ResourceType::Vpc,
                app,
                environment,
                &[("Name", &names.vpc())],
            ))
            .send()
            .await
            .context("Failed to create VPC")?;

        let vpc_id = created
            .vpc()
            .and_then(|v| v.vpc_id())
            .context("No VPC ID in response")?
            .to_string();

        // Instances and tasks resolve the registry and logs endpoints by name
        self.client
            .modify_vpc_attribute()
            .vpc_id(&vpc_id)
            .enable_dns_support(AttributeBooleanValue::builder().value(true).build())
            .send()
            .await
            .context("Failed to enable VPC DNS support")?;
        self.client
            .modify_vpc_attribute()
            .vpc_id(&vpc_id)
            .enable_dns_hostnames(AttributeBooleanValue::builder().value(true).build())
            .send()
            .await
            .context("Failed to enable VPC DNS hostnames")?;

        let azs = self.first_availability_zones(2).await?;
        let mut subnet_ids = Vec::new();
        for (cidr, az) in SUBNET_CIDRS.iter().zip(azs.iter()) {
            let subnet = self
                .client
                .create_subnet()
                .vpc_id(&vpc_id)
                .cidr_block(*cidr)
                .availability_zone(az)
                .tag_specifications(ec2_tag_spec(
                    ResourceType::Subnet,
                    app,
                    environment,
                    &[("Name", &format!("{}-{az}", names.vpc()))],
                ))
                .send()
                .await
                .with_context(|| format!("Failed to create subnet in {az}"))?;
            let subnet_id = subnet
                .subnet()
                .and_then(|s| s.subnet_id())
                .context("No subnet ID in response")?
                .to_string();

            self.client
                .modify_subnet_attribute()
                .subnet_id(&subnet_id)
                .map_public_ip_on_launch(AttributeBooleanValue::builder().value(true).build())
                .send()
                .await
                .context("Failed to enable public IPs on subnet")?;
            subnet_ids.push(subnet_id);
        }

        let igw = self
            .client
            .create_internet_gateway()
            .tag_specifications(ec2_tag_spec(
                ResourceType::InternetGateway,
                app,
                environment,
                &[("Name", &format!("{}-igw", names.vpc()))],
            ))
            .send()
            .await
            .context("Failed to create internet gateway")?;
        let igw_id = igw
            .internet_gateway()
            .and_then(|g| g.internet_gateway_id())
            .context("No internet gateway ID in response")?
            .to_string();

        self.client
            .attach_internet_gateway()
            .internet_gateway_id(&igw_id)
            .vpc_id(&vpc_id)
            .send()
            .await
            .context("Failed to attach internet gateway")?;

        // Default route in the main route table, no custom routing beyond it
        let main_route_table = self.main_route_table(&vpc_id).await?;
        self.client
            .create_route()
            .route_table_id(&main_route_table)
            .destination_cidr_block("0.0.0.0/0")
            .gateway_id(&igw_id)
            .send()
            .await
            .context("Failed to create default route")?;

        info!(vpc_id = %vpc_id, subnets = ?subnet_ids, "VPC ready");
        Ok(NetworkRef { vpc_id, subnet_ids })
    }

    /// Create the load balancer and service security groups with the gate
    /// topology's rule graph. Existing groups with the same names are adopted.
    pub async fn ensure_security_groups(
        &self,
        names: &ResourceNames,
        vpc_id: &str,
        container_port: u16,
        app: &str,
        environment: &str,
    ) -> Result<SecurityGroupPair> {
        let alb_sg_id = self
            .ensure_security_group(
                &names.alb_security_group(),
                "Public ingress for the application load balancer",
                vpc_id,
                app,
                environment,
            )
            .await?;
        self.authorize_ingress(&alb_sg_id, alb_ingress_permissions())
            .await?;

        let service_sg_id = self
            .ensure_security_group(
                &names.service_security_group(),
                "Service ingress, load balancer and self only",
                vpc_id,
                app,
                environment,
            )
            .await?;
        self.authorize_ingress(
            &service_sg_id,
            service_ingress_permissions(&alb_sg_id, &service_sg_id, container_port),
        )
        .await?;

        info!(
            alb_sg = %alb_sg_id,
            service_sg = %service_sg_id,
            "Security groups ready"
        );
        Ok(SecurityGroupPair {
            alb_sg_id,
            service_sg_id,
        })
    }

    async fn ensure_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
        app: &str,
        environment: &str,
    ) -> Result<String> {
        let create = self
            .client
            .create_security_group()
            .group_name(name)
            .description(description)
            .vpc_id(vpc_id)
            .tag_specifications(ec2_tag_spec(
                ResourceType::SecurityGroup,
                app,
                environment,
                &[("Name", name)],
            ))
            .send()
            .await;

        match create {
            Ok(response) => {
                let sg_id = response
                    .group_id()
                    .context("No security group ID in response")?
                    .to_string();
                info!(name = %name, sg_id = %sg_id, "Created security group");
                Ok(sg_id)
            }
            Err(err) if classify_sdk_error(&err).is_already_exists() => {
                let found = self
                    .client
                    .describe_security_groups()
                    .filters(Filter::builder().name("group-name").values(name).build())
                    .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
                    .send()
                    .await
                    .context("Failed to describe existing security group")?;
                let sg_id = found
                    .security_groups()
                    .first()
                    .and_then(|sg| sg.group_id())
                    .context("Security group exists but was not found by name")?
                    .to_string();
                debug!(name = %name, sg_id = %sg_id, "Adopting existing security group");
                Ok(sg_id)
            }
            Err(err) => Err(err).context("Failed to create security group"),
        }
    }

    async fn authorize_ingress(
        &self,
        sg_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<()> {
        let result = self
            .client
            .authorize_security_group_ingress()
            .group_id(sg_id)
            .set_ip_permissions(Some(permissions))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            // Re-running a deployment re-authorizes the same rules
            Err(err) if classify_sdk_error(&err).is_already_exists() => {
                debug!(sg_id = %sg_id, "Ingress rules already present");
                Ok(())
            }
            Err(err) => Err(err).context("Failed to add ingress rules to security group"),
        }
    }

    /// Delete a security group.
    ///
    /// Returns Ok(()) if the group was deleted or doesn't exist. Retries on
    /// DependencyViolation while task interfaces are still releasing.
    pub async fn delete_security_group(&self, sg_id: &str) -> Result<()> {
        info!(sg_id = %sg_id, "Deleting security group");

        let sg_id_for_log = sg_id.to_string();
        (|| async {
            let result = self
                .client
                .delete_security_group()
                .group_id(sg_id)
                .send()
                .await;
            match ignore_not_found(result).context("Failed to delete security group")? {
                Some(_) => info!(sg_id = %sg_id, "Security group deleted"),
                None => debug!(sg_id = %sg_id, "Security group already deleted"),
            }
            Ok(())
        })
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(10))
                .with_max_delay(Duration::from_secs(60))
                .with_max_times(5),
        )
        .when(|e| classify_anyhow_error(e).is_retryable())
        .notify(|e, dur| {
            warn!(
                sg_id = %sg_id_for_log,
                delay = ?dur,
                error = %e,
                "Security group deletion failed, retrying..."
            );
        })
        .await
    }

    /// Find a security group by name within a VPC, if it exists.
    pub async fn find_security_group(&self, name: &str, vpc_id: &str) -> Result<Option<String>> {
        let found = self
            .client
            .describe_security_groups()
            .filters(Filter::builder().name("group-name").values(name).build())
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .send()
            .await
            .context("Failed to describe security groups")?;
        Ok(found
            .security_groups()
            .first()
            .and_then(|sg| sg.group_id())
            .map(|id| id.to_string()))
    }

    /// Find the deployment's VPC by its tags.
    pub async fn find_tagged_vpc(&self, app: &str, environment: &str) -> Result<Option<String>> {
        let found = self
            .client
            .describe_vpcs()
            .filters(
                Filter::builder()
                    .name(format!("tag:{TAG_TOOL}"))
                    .values(TAG_TOOL_VALUE)
                    .build(),
            )
            .filters(
                Filter::builder()
                    .name(format!("tag:{TAG_APP}"))
                    .values(app)
                    .build(),
            )
            .filters(
                Filter::builder()
                    .name(format!("tag:{TAG_ENVIRONMENT}"))
                    .values(environment)
                    .build(),
            )
            .send()
            .await
            .context("Failed to describe VPCs")?;

        Ok(found
            .vpcs()
            .first()
            .and_then(|v| v.vpc_id())
            .map(|id| id.to_string()))
    }

    /// Tear down the VPC layout created by [`Self::ensure_network`].
    pub async fn delete_network(&self, vpc_id: &str) -> Result<()> {
        info!(vpc_id = %vpc_id, "Deleting network");

        // Internet gateways detach before they delete
        let igws = self
            .client
            .describe_internet_gateways()
            .filters(
                Filter::builder()
                    .name("attachment.vpc-id")
                    .values(vpc_id)
                    .build(),
            )
            .send()
            .await
            .context("Failed to describe internet gateways")?;
        for igw in igws.internet_gateways() {
            if let Some(igw_id) = igw.internet_gateway_id() {
                let detach = self
                    .client
                    .detach_internet_gateway()
                    .internet_gateway_id(igw_id)
                    .vpc_id(vpc_id)
                    .send()
                    .await;
                if let Err(e) = detach {
                    debug!(igw_id = %igw_id, error = ?e, "Internet gateway already detached");
                }
                let result = self
                    .client
                    .delete_internet_gateway()
                    .internet_gateway_id(igw_id)
                    .send()
                    .await;
                ignore_not_found(result).context("Failed to delete internet gateway")?;
            }
        }

        for subnet_id in self.subnet_ids(vpc_id).await? {
            let result = self
                .client
                .delete_subnet()
                .subnet_id(&subnet_id)
                .send()
                .await;
            ignore_not_found(result).context("Failed to delete subnet")?;
        }

        let result = self.client.delete_vpc().vpc_id(vpc_id).send().await;
        match ignore_not_found(result).context("Failed to delete VPC")? {
            Some(_) => info!(vpc_id = %vpc_id, "VPC deleted"),
            None => debug!(vpc_id = %vpc_id, "VPC already deleted"),
        }
        Ok(())
    }

    async fn subnet_ids(&self, vpc_id: &str) -> Result<Vec<String>> {
        let subnets = self
            .client
            .describe_subnets()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .send()
            .await
            .context("Failed to describe subnets")?;
        Ok(subnets
            .subnets()
            .iter()
            .filter_map(|s| s.subnet_id().map(|id| id.to_string()))
            .collect())
    }

    async fn first_availability_zones(&self, count: usize) -> Result<Vec<String>> {
        let zones = self
            .client
            .describe_availability_zones()
            .filters(Filter::builder().name("state").values("available").build())
            .send()
            .await
            .context("Failed to describe availability zones")?;

        let mut names: Vec<String> = zones
            .availability_zones()
            .iter()
            .filter_map(|z| z.zone_name().map(|n| n.to_string()))
            .collect();
        names.sort();
        names.truncate(count);
        anyhow::ensure!(
            names.len() == count,
            "Region has fewer than {count} availability zones"
        );
        Ok(names)
    }

    async fn main_route_table(&self, vpc_id: &str) -> Result<String> {
        let tables = self
            .client
            .describe_route_tables()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .filters(
                Filter::builder()
                    .name("association.main")
                    .values("true")
                    .build(),
            )
            .send()
            .await
            .context("Failed to describe route tables")?;
        tables
            .route_tables()
            .first()
            .and_then(|t| t.route_table_id())
            .map(|id| id.to_string())
            .context("VPC has no main route table")
    }
}

/// Ingress permissions for the load balancer group: the public listener port
/// from anywhere.
pub fn alb_ingress_permissions() -> Vec<IpPermission> {
    vec![IpPermission::builder()
        .ip_protocol("tcp")
        .from_port(i32::from(ALB_PORT))
        .to_port(i32::from(ALB_PORT))
        .ip_ranges(
            IpRange::builder()
                .cidr_ip("0.0.0.0/0")
                .description("Public HTTP")
                .build(),
        )
        .build()]
}

/// Ingress permissions for the service group: traffic from the load
/// balancer's group on the listener port and the container port, plus all
/// traffic from the group itself. No other inbound source.
pub fn service_ingress_permissions(
    alb_sg_id: &str,
    service_sg_id: &str,
    container_port: u16,
) -> Vec<IpPermission> {
    let from_alb = |port: u16| {
        IpPermission::builder()
            .ip_protocol("tcp")
            .from_port(i32::from(port))
            .to_port(i32::from(port))
            .user_id_group_pairs(
                UserIdGroupPair::builder()
                    .group_id(alb_sg_id)
                    .description("From load balancer")
                    .build(),
            )
            .build()
    };

    vec![
        from_alb(ALB_PORT),
        from_alb(container_port),
        IpPermission::builder()
            .ip_protocol("-1")
            .user_id_group_pairs(
                UserIdGroupPair::builder()
                    .group_id(service_sg_id)
                    .description("From self")
                    .build(),
            )
            .build(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alb_group_admits_only_public_http() {
        let permissions = alb_ingress_permissions();
        assert_eq!(permissions.len(), 1);
        assert_eq!(permissions[0].from_port(), Some(80));
        assert_eq!(permissions[0].to_port(), Some(80));
        assert_eq!(
            permissions[0].ip_ranges()[0].cidr_ip(),
            Some("0.0.0.0/0")
        );
        assert!(permissions[0].user_id_group_pairs().is_empty());
    }

    #[test]
    fn service_group_admits_only_alb_and_self() {
        let permissions = service_ingress_permissions("sg-alb", "sg-service", 8501);
        assert_eq!(permissions.len(), 3);

        // Listener port and container port, both sourced from the ALB group
        for (permission, port) in permissions[..2].iter().zip([80, 8501]) {
            assert_eq!(permission.ip_protocol(), Some("tcp"));
            assert_eq!(permission.from_port(), Some(port));
            assert_eq!(permission.to_port(), Some(port));
            assert_eq!(
                permission.user_id_group_pairs()[0].group_id(),
                Some("sg-alb")
            );
            assert!(permission.ip_ranges().is_empty(), "no CIDR sources allowed");
        }

        // All protocols from the service's own group
        assert_eq!(permissions[2].ip_protocol(), Some("-1"));
        assert_eq!(
            permissions[2].user_id_group_pairs()[0].group_id(),
            Some("sg-service")
        );
        assert!(permissions[2].ip_ranges().is_empty());
    }

    #[test]
    fn service_group_has_no_cidr_sources() {
        let permissions = service_ingress_permissions("sg-a", "sg-b", 9000);
        for permission in &permissions {
            assert!(permission.ip_ranges().is_empty());
            assert!(permission.ipv6_ranges().is_empty());
        }
    }
}
