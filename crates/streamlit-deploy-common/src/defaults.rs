//! Default configuration values shared across the deployment units
//!
//! These constants keep the registry, load balancer, service, and edge units
//! agreeing on the same numbers.

/// Sentinel image tag; when the requested version equals this, only one push happens
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Public port the load balancer listens on
pub const ALB_PORT: u16 = 80;

/// Lifecycle rule 1: untagged images older than this many days are expired
pub const UNTAGGED_IMAGE_EXPIRY_DAYS: u32 = 7;

/// Lifecycle rule 2: keep only this many images, regardless of tag
pub const MAX_STORED_IMAGES: u32 = 4;

/// Health check request path
pub const HEALTH_CHECK_PATH: &str = "/";

/// Seconds between health check probes
pub const HEALTH_CHECK_INTERVAL_SECS: i32 = 60;

/// HTTP codes counted as healthy. Deliberately wide: the hosted app answers
/// its root path with an unauthenticated-but-alive status.
pub const HEALTHY_HTTP_CODES: &str = "200-499";

/// Scaling bounds for the orchestrated service
pub const AUTOSCALE_MIN_TASKS: i32 = 1;
pub const AUTOSCALE_MAX_TASKS: i32 = 2;

/// CPU utilization target for the scaling policy, in percent
pub const AUTOSCALE_CPU_TARGET_PERCENT: f64 = 70.0;

/// Cooldown applied to both scale-in and scale-out, in seconds
pub const AUTOSCALE_COOLDOWN_SECS: i32 = 60;

/// Fargate task sizing (CPU units / MiB), as the task definition spells them
pub const TASK_CPU_UNITS: &str = "256";
pub const TASK_MEMORY_MIB: &str = "512";

/// Tasks the service starts with before autoscaling takes over
pub const SERVICE_DESIRED_COUNT: i32 = 1;

/// Log group retention in days
pub const LOG_RETENTION_DAYS: i32 = 30;

/// Listener rule priority for the origin-verification forward rule
pub const GATE_RULE_PRIORITY: i32 = 1;

/// Address block for the dedicated network
pub const VPC_CIDR: &str = "10.0.0.0/16";

/// Public subnet blocks, one per availability zone
pub const SUBNET_CIDRS: [&str; 2] = ["10.0.0.0/24", "10.0.1.0/24"];

/// Timeout for `docker build` in seconds
pub const IMAGE_BUILD_TIMEOUT_SECS: u64 = 1800;

/// Timeout for `docker push` in seconds
pub const IMAGE_PUSH_TIMEOUT_SECS: u64 = 900;
