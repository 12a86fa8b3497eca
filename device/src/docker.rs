// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Lab transport for devices emulated as docker containers.

use crate::command::Command;
use crate::exec::{DeviceExecutor, ExecError, FileTransfer};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bytes::Bytes;
use derive_builder::Builder;
use futures_util::TryStreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

/// Runs commands in the container of each device through the docker exec API.
///
/// The container of device `d` is named `<container_prefix>d`.
#[derive(Builder, Debug, Clone)]
pub struct DockerExec {
    /// Connection to the docker daemon
    docker: Docker,

    /// Prefix turning a device name into its container name
    #[builder(setter(into), default)]
    container_prefix: String,
}

impl DockerExec {
    /// Talk to the local docker daemon, with its default socket.
    pub fn connect(container_prefix: impl Into<String>) -> Result<Self, bollard::errors::Error> {
        Ok(Self {
            docker: Docker::connect_with_local_defaults()?,
            container_prefix: container_prefix.into(),
        })
    }

    fn container(&self, device: &str) -> String {
        format!("{}{device}", self.container_prefix)
    }

    // Run `argv` in the container of `device`, feeding it `stdin` if any.
    async fn run(
        &self,
        device: &str,
        argv: Vec<String>,
        description: &str,
        stdin: Option<Bytes>,
    ) -> Result<Vec<u8>, ExecError> {
        let api_error = |source| ExecError::Docker {
            device: device.to_string(),
            command: description.to_string(),
            source,
        };
        let exec = self
            .docker
            .create_exec(
                &self.container(device),
                CreateExecOptions {
                    cmd: Some(argv),
                    attach_stdin: Some(stdin.is_some()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(api_error)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        match self
            .docker
            .start_exec(&exec.id, None::<StartExecOptions>)
            .await
            .map_err(api_error)?
        {
            StartExecResults::Attached {
                mut output,
                mut input,
            } => {
                if let Some(content) = stdin {
                    let io_error = |source| ExecError::Io {
                        device: device.to_string(),
                        command: description.to_string(),
                        source,
                    };
                    input.write_all(&content).await.map_err(io_error)?;
                    // end of input
                    input.shutdown().await.map_err(io_error)?;
                }
                while let Some(chunk) = output.try_next().await.map_err(api_error)? {
                    match chunk {
                        LogOutput::StdOut { message } | LogOutput::Console { message } => {
                            stdout.extend_from_slice(&message);
                        }
                        LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                        LogOutput::StdIn { .. } => {}
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspected = self.docker.inspect_exec(&exec.id).await.map_err(api_error)?;
        check_output(device, description, inspected.exit_code, stdout, &stderr)
    }
}

// Only the exit code decides: tools routinely print warnings on their standard error.
fn check_output(
    device: &str,
    command: &str,
    exit_code: Option<i64>,
    stdout: Vec<u8>,
    stderr: &[u8],
) -> Result<Vec<u8>, ExecError> {
    if exit_code != Some(0) {
        return Err(ExecError::NonZeroStatus {
            device: device.to_string(),
            command: command.to_string(),
            status: exit_code.map_or_else(|| "unknown".to_string(), |code| code.to_string()),
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(stderr).to_string(),
        });
    }
    if !stderr.is_empty() {
        debug!(
            "{device}: `{command}` printed on stderr: {}",
            String::from_utf8_lossy(stderr).trim_end()
        );
    }
    Ok(stdout)
}

#[async_trait]
impl DeviceExecutor for DockerExec {
    async fn exec(&self, device: &str, command: &Command) -> Result<Vec<u8>, ExecError> {
        debug!("{device}: running `{command}`");
        let stdout = self
            .run(device, command.argv().to_vec(), &command.to_string(), None)
            .await?;
        trace!("{device}: `{command}` printed {} bytes", stdout.len());
        Ok(stdout)
    }
}

#[async_trait]
impl FileTransfer for DockerExec {
    async fn copy(&self, device: &str, destination: &str, content: Bytes) -> Result<(), ExecError> {
        debug!("{device}: writing {} bytes to {destination}", content.len());
        let argv = Vec::from(["sh", "-c", "cat > \"$1\"", "sh", destination].map(String::from));
        self.run(device, argv, &format!("copy to {destination}"), Some(content))
            .await
            .map(|_| ())
    }
}
