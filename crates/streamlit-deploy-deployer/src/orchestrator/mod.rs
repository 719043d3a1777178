//! Deployment orchestration
//!
//! The orchestrator threads the plan through the units in dependency order:
//! registry, network, compute, edge. `status` and `destroy` reuse the same
//! plan, so no deployment state is recorded anywhere - the deterministic
//! names are the state.

pub mod deploy;
pub mod status;
pub mod teardown;

pub use deploy::{run_deploy, DeployOptions};
pub use status::run_status;
pub use teardown::run_destroy;

use std::fmt;

/// Informational outputs printed after a successful deployment
#[derive(Debug, Clone)]
pub struct DeployOutputs {
    pub repository_arn: String,
    pub repository_name: String,
    /// Public URL of the managed hosting endpoint or the edge distribution
    pub service_url: String,
}

impl fmt::Display for DeployOutputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "repository arn:  {}", self.repository_arn)?;
        writeln!(f, "repository name: {}", self.repository_name)?;
        write!(f, "service url:     {}", self.service_url)
    }
}
