// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Transport to the lab devices.

use crate::command::Command;
use async_trait::async_trait;
use bytes::Bytes;

#[derive(thiserror::Error, Debug)]
pub enum ExecError {
    #[error("Docker failed to run `{command}` on device {device}: {source}")]
    Docker {
        device: String,
        command: String,
        source: bollard::errors::Error,
    },
    #[error("Failed to feed `{command}` on device {device}: {source}")]
    Io {
        device: String,
        command: String,
        source: std::io::Error,
    },
    #[error(
        "`{command}` on device {device} exited with non-zero status. status: {status}, stdout: {stdout}, stderr: {stderr}"
    )]
    NonZeroStatus {
        device: String,
        command: String,
        status: String,
        stdout: String,
        stderr: String,
    },
    #[error("Unexpected output from `{command}` on device {device}: {reason}")]
    BadOutput {
        device: String,
        command: String,
        reason: String,
    },
}

/// Runs commands on the devices of the lab.
#[async_trait]
pub trait DeviceExecutor: Send + Sync {
    /// Run `command` on `device` and return what it printed on its standard output.
    ///
    /// Completion with a non-zero status is an error.
    async fn exec(&self, device: &str, command: &Command) -> Result<Vec<u8>, ExecError>;
}

/// Stages files on the devices of the lab.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Write `content` to `destination` on `device`, replacing any previous file.
    async fn copy(&self, device: &str, destination: &str, content: Bytes) -> Result<(), ExecError>;
}
