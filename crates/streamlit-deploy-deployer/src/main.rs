//! streamlit-deploy: deploy a containerized Streamlit app to AWS
//!
//! Configuration comes from the environment (`CDK_DEPLOY_REGIONS`,
//! `ENVIRONMENTS`, `ECR_REPOSITORY_NAME`, `APP_NAME`, `IMAGE_VERSION`,
//! `PLATFORMS`, `PORT`); the CLI only selects the topology and the action.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use streamlit_deploy_deployer::orchestrator::status::StatusFormat;
use streamlit_deploy_deployer::orchestrator::{run_deploy, run_destroy, run_status, DeployOptions};
use streamlit_deploy_deployer::plan::{DeploymentPlan, Topology};
use streamlit_deploy_common::EnvironmentSettings;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "streamlit-deploy")]
#[command(about = "Deploy containerized Streamlit apps to AWS")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

/// Flags shared by every subcommand
#[derive(clap::Args, Debug)]
struct CommonArgs {
    /// Hosting topology
    #[arg(long, value_enum, default_value_t = Topology::FargateCdn)]
    topology: Topology,

    /// AWS profile to use (overrides AWS_PROFILE env var)
    #[arg(long)]
    aws_profile: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy every configured (region, environment) target
    Deploy {
        #[command(flatten)]
        common: CommonArgs,

        /// Directory containing the Dockerfile
        #[arg(long, default_value = ".")]
        build_context: PathBuf,

        /// Print the plan without touching AWS
        #[arg(long)]
        dry_run: bool,

        /// Skip the image build/push; the requested tags must already exist
        #[arg(long)]
        skip_push: bool,
    },

    /// Report the live state of every planned resource
    Status {
        #[command(flatten)]
        common: CommonArgs,

        /// Output format
        #[arg(long, value_enum, default_value_t = StatusFormat::Table)]
        format: StatusFormat,
    },

    /// Tear down every configured (region, environment) target
    Destroy {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    // Resolved once; every downstream unit gets an explicit immutable config
    let settings = EnvironmentSettings::from_env()?;
    let targets = settings.targets();
    anyhow::ensure!(!targets.is_empty(), "No deployment targets configured");

    match args.command {
        Command::Deploy {
            common,
            build_context,
            dry_run,
            skip_push,
        } => {
            let options = DeployOptions {
                build_context,
                skip_push,
                aws_profile: common.aws_profile,
            };
            for config in targets {
                let plan = DeploymentPlan::new(config, common.topology);
                if dry_run {
                    print!("{}", plan.render());
                    continue;
                }
                let outputs = run_deploy(&plan, &options).await?;
                println!("{outputs}");
            }
        }

        Command::Status { common, format } => {
            let options = DeployOptions {
                build_context: PathBuf::from("."),
                skip_push: true,
                aws_profile: common.aws_profile,
            };
            for config in targets {
                let plan = DeploymentPlan::new(config, common.topology);
                info!(
                    app = %plan.config.app_name,
                    environment = %plan.config.environment,
                    region = %plan.config.region,
                    "Checking deployment status"
                );
                run_status(&plan, &options, format).await?;
            }
        }

        Command::Destroy { common } => {
            let options = DeployOptions {
                build_context: PathBuf::from("."),
                skip_push: true,
                aws_profile: common.aws_profile,
            };
            for config in targets {
                let plan = DeploymentPlan::new(config, common.topology);
                run_destroy(&plan, &options).await?;
            }
        }
    }

    Ok(())
}
