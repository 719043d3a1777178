//! Image build and publish via the local docker toolchain
//!
//! The build-time artifact interface: a local directory containing a
//! Dockerfile is built for the configured platform and pushed to the
//! registry under the requested tags. Command output is streamed line by
//! line into the log so long builds stay observable.

use crate::aws::ecr::RegistryAuth;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use streamlit_deploy_common::defaults::{IMAGE_BUILD_TIMEOUT_SECS, IMAGE_PUSH_TIMEOUT_SECS};
use streamlit_deploy_common::Platform;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Builds and pushes the application image from a local build context.
#[derive(Debug, Clone)]
pub struct ImagePublisher {
    context_dir: PathBuf,
}

impl ImagePublisher {
    pub fn new(context_dir: impl Into<PathBuf>) -> Self {
        Self {
            context_dir: context_dir.into(),
        }
    }

    /// Build the image for `platform` and push it under every tag in `tags`.
    ///
    /// The registry credentials come from the registry unit; docker receives
    /// the password on stdin, never on the command line.
    pub async fn publish(
        &self,
        repository_uri: &str,
        tags: &[String],
        platform: Platform,
        auth: &RegistryAuth,
    ) -> Result<()> {
        anyhow::ensure!(!tags.is_empty(), "At least one image tag is required");
        let context_dir = self
            .context_dir
            .canonicalize()
            .with_context(|| format!("Build context {} not found", self.context_dir.display()))?;

        self.login(auth).await?;

        let primary = format!("{repository_uri}:{}", tags[0]);
        info!(
            image = %primary,
            platform = %platform,
            context = %context_dir.display(),
            "Building image"
        );
        run_streamed(
            "docker",
            &[
                "build",
                "--platform",
                platform.docker_platform(),
                "-t",
                &primary,
                context_dir
                    .to_str()
                    .context("Build context path is not valid UTF-8")?,
            ],
            None,
            Duration::from_secs(IMAGE_BUILD_TIMEOUT_SECS),
        )
        .await
        .context("Image build failed")?;

        // Additional tags alias the freshly built image
        for tag in &tags[1..] {
            let aliased = format!("{repository_uri}:{tag}");
            run_streamed(
                "docker",
                &["tag", &primary, &aliased],
                None,
                Duration::from_secs(60),
            )
            .await
            .with_context(|| format!("Failed to tag image as {aliased}"))?;
        }

        for tag in tags {
            let image = format!("{repository_uri}:{tag}");
            info!(image = %image, "Pushing image");
            run_streamed(
                "docker",
                &["push", &image],
                None,
                Duration::from_secs(IMAGE_PUSH_TIMEOUT_SECS),
            )
            .await
            .with_context(|| format!("Failed to push {image}"))?;
        }

        info!(tags = ?tags, "Image published");
        Ok(())
    }

    async fn login(&self, auth: &RegistryAuth) -> Result<()> {
        debug!(endpoint = %auth.endpoint, "Logging in to registry");
        run_streamed(
            "docker",
            &[
                "login",
                "--username",
                &auth.username,
                "--password-stdin",
                &auth.endpoint,
            ],
            Some(auth.password.clone()),
            Duration::from_secs(60),
        )
        .await
        .context("Registry login failed")
    }
}

/// Run a command, streaming stdout/stderr lines into the log.
///
/// Returns an error when the command cannot be spawned, exceeds `timeout`,
/// or exits non-zero.
async fn run_streamed(
    cmd: &str,
    args: &[&str],
    stdin_data: Option<String>,
    timeout: Duration,
) -> Result<()> {
    debug!(cmd = %cmd, args = ?args, timeout_secs = timeout.as_secs(), "Running command");

    let mut child = Command::new(cmd)
        .args(args)
        .stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to spawn command: {cmd}"))?;

    if let Some(data) = stdin_data {
        let mut stdin = child.stdin.take().context("Failed to open stdin")?;
        stdin
            .write_all(data.as_bytes())
            .await
            .context("Failed to write to stdin")?;
        drop(stdin);
    }

    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;

    let stdout_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "docker", "{line}");
        }
    });
    let stderr_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "docker", "{line}");
        }
    });

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(result) => result.context("Failed waiting for command")?,
        Err(_) => {
            warn!(cmd = %cmd, timeout_secs = timeout.as_secs(), "Command timed out, killing");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill timed-out process");
            }
            anyhow::bail!("Command {cmd} timed out after {}s", timeout.as_secs());
        }
    };

    let _ = stdout_handle.await;
    let _ = stderr_handle.await;

    anyhow::ensure!(
        status.success(),
        "Command {cmd} exited with {}",
        status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string())
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_streamed_succeeds_on_zero_exit() {
        run_streamed("true", &[], None, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn run_streamed_fails_on_nonzero_exit() {
        let err = run_streamed("false", &[], None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }

    #[tokio::test]
    async fn run_streamed_errors_on_missing_command() {
        let result = run_streamed(
            "this-command-does-not-exist-51423",
            &[],
            None,
            Duration::from_secs(5),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn run_streamed_accepts_stdin() {
        run_streamed(
            "cat",
            &[],
            Some("hello\n".to_string()),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    }
}
