//! Remote shell transport.
//!
//! One call to [`RemoteShell::exec`] is one session: connect, run one
//! command, disconnect. Nothing is pooled between calls.

use std::io::Write as _;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::error::{NodeError, NodeResult};
use crate::models::NodeConnection;

/// Exit status the OpenSSH client uses for its own connection failures.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// A node's SSH private key. Never printed.
#[derive(Clone)]
pub struct PrivateKey(String);

impl PrivateKey {
    pub fn new(pem: impl Into<String>) -> Self {
        Self(pem.into())
    }

    /// The key material, for the transport and for persistence only.
    pub(crate) fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// What a remote command left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Stdout of a successful command; `RemoteCommandFailed` otherwise.
    pub fn into_stdout(self) -> NodeResult<String> {
        if self.exit_code == 0 {
            Ok(self.stdout)
        } else {
            Err(NodeError::RemoteCommandFailed {
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs commands on a node.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command` in a fresh session, feeding `stdin` if given.
    ///
    /// Connection-level failures are `NodeUnreachable`; a command that ran
    /// and exited non-zero is returned as an ordinary [`CommandOutput`].
    async fn exec(
        &self,
        node: &NodeConnection,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> NodeResult<CommandOutput>;
}

/// Settings for the OpenSSH client.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Path or name of the `ssh` executable.
    pub binary: String,

    /// Passed as `ConnectTimeout`.
    pub connect_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            binary: "ssh".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// [`RemoteShell`] backed by the system OpenSSH client.
///
/// The node's key is written to a private temporary file for the lifetime of
/// the session and removed afterwards.
#[derive(Debug, Clone, Default)]
pub struct SshShell {
    config: SshConfig,
}

impl SshShell {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    fn command(&self, node: &NodeConnection, key_path: &std::path::Path, remote: &str) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("-i")
            .arg(key_path)
            .arg("-p")
            .arg(node.port.to_string())
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "IdentitiesOnly=yes"])
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.config.connect_timeout.as_secs().max(1)
            ))
            .arg(format!("{}@{}", node.user, node.address))
            .arg(remote)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Write the key where only this process can read it.
fn stage_key(key: &PrivateKey) -> NodeResult<tempfile::NamedTempFile> {
    // tempfile creates files with mode 0600 on unix
    let mut file = tempfile::Builder::new().prefix("zonefleet-key-").tempfile()?;
    file.write_all(key.expose_secret().as_bytes())?;
    if !key.expose_secret().ends_with('\n') {
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(file)
}

#[async_trait]
impl RemoteShell for SshShell {
    #[instrument(skip(self, node, command, stdin), fields(address = %node.address, port = node.port))]
    async fn exec(
        &self,
        node: &NodeConnection,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> NodeResult<CommandOutput> {
        let key = stage_key(&node.private_key)?;

        let mut cmd = self.command(node, key.path(), command);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|e| NodeError::NodeUnreachable {
            address: node.address.clone(),
            message: format!("failed to start {}: {}", self.config.binary, e),
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        drop(key);

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if exit_code == SSH_CONNECTION_FAILURE {
            return Err(NodeError::NodeUnreachable {
                address: node.address.clone(),
                message: stderr.trim().to_string(),
            });
        }

        debug!(exit_code, "Remote command finished");

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }
}
