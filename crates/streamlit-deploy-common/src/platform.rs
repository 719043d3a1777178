//! Supported container platforms
//!
//! The original deployment accepted a free-form platform string and treated
//! everything that wasn't "arm" as x86. Here the set is a closed enumeration:
//! unrecognized values are rejected at configuration time instead of silently
//! falling back.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// CPU architecture the container image is built for and runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Amd64,
    Arm64,
}

/// Error for platform strings outside the supported set
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized platform '{0}' (expected LINUX_AMD64 or LINUX_ARM64)")]
pub struct UnknownPlatform(pub String);

impl Platform {
    /// Platform flag passed to `docker build --platform`
    pub fn docker_platform(self) -> &'static str {
        match self {
            Platform::Amd64 => "linux/amd64",
            Platform::Arm64 => "linux/arm64",
        }
    }

    /// CPU architecture name as the container orchestrator spells it
    pub fn cpu_architecture(self) -> &'static str {
        match self {
            Platform::Amd64 => "X86_64",
            Platform::Arm64 => "ARM64",
        }
    }
}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept both the deploy-variable spelling (LINUX_ARM64) and the
        // short architecture names used elsewhere in the toolchain.
        match s.trim().to_ascii_lowercase().as_str() {
            "linux_amd64" | "amd64" | "x86_64" | "x86" => Ok(Platform::Amd64),
            "linux_arm64" | "arm64" | "arm" | "aarch64" => Ok(Platform::Arm64),
            _ => Err(UnknownPlatform(s.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Amd64 => write!(f, "amd64"),
            Platform::Arm64 => write!(f, "arm64"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_deploy_variable_spellings() {
        assert_eq!("LINUX_AMD64".parse::<Platform>().unwrap(), Platform::Amd64);
        assert_eq!("LINUX_ARM64".parse::<Platform>().unwrap(), Platform::Arm64);
    }

    #[test]
    fn parses_short_names() {
        assert_eq!("arm".parse::<Platform>().unwrap(), Platform::Arm64);
        assert_eq!("aarch64".parse::<Platform>().unwrap(), Platform::Arm64);
        assert_eq!("x86_64".parse::<Platform>().unwrap(), Platform::Amd64);
    }

    #[test]
    fn rejects_unknown_values() {
        let err = "riscv64".parse::<Platform>().unwrap_err();
        assert_eq!(err, UnknownPlatform("riscv64".to_string()));
    }

    #[test]
    fn docker_and_orchestrator_spellings() {
        assert_eq!(Platform::Arm64.docker_platform(), "linux/arm64");
        assert_eq!(Platform::Arm64.cpu_architecture(), "ARM64");
        assert_eq!(Platform::Amd64.docker_platform(), "linux/amd64");
        assert_eq!(Platform::Amd64.cpu_architecture(), "X86_64");
    }
}
