//! streamlit-deploy-deployer - AWS deployment orchestrator
//!
//! This crate provides the `streamlit-deploy` binary that provisions the
//! registry, network, compute, and edge units for a containerized Streamlit
//! application, and can report on or tear down an existing deployment.

pub mod aws;
pub mod orchestrator;
pub mod plan;
pub mod wait;
