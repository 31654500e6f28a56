//! Process-based ssh/scp client.
//!
//! Every call spawns a fresh `ssh`/`scp` subprocess with the connection
//! parameters of the target. Call volume per deployment run is small, so
//! there is no connection pooling or multiplexing.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
}

impl SshTarget {
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

#[derive(Debug, Clone)]
pub struct SshConfig {
    pub connect_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshCommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Error)]
pub enum SshError {
    #[error("ssh connection error: {message}")]
    Connection { message: String },
    #[error("file transfer failed: {message}")]
    Transfer { message: String },
}

#[derive(Debug, Default)]
pub struct ProcessSshClient {
    config: SshConfig,
}

impl ProcessSshClient {
    pub fn new() -> Self {
        Self {
            config: SshConfig::default(),
        }
    }

    pub fn with_config(config: SshConfig) -> Self {
        Self { config }
    }

    /// Connection options shared by ssh and scp. Host keys are accepted on
    /// first use; a changed host key is still rejected.
    fn common_options(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout.as_secs()),
        ]
    }

    fn ssh_command(&self, target: &SshTarget) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.common_options());
        cmd.arg("-p").arg(target.port.to_string());
        if let Some(identity) = &target.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(target.destination());
        cmd
    }

    fn scp_command(&self, target: &SshTarget) -> Command {
        let mut cmd = Command::new("scp");
        cmd.args(self.common_options());
        // scp spells the port flag with a capital P
        cmd.arg("-P").arg(target.port.to_string());
        if let Some(identity) = &target.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd
    }

    /// Run a command on the target, capturing stdout and stderr. A non-zero
    /// exit code of the remote command is reported in the result, not as an
    /// error; only failure to spawn ssh itself is an error.
    pub fn execute(&self, target: &SshTarget, command: &str) -> Result<SshCommandResult, SshError> {
        let output = self
            .ssh_command(target)
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| SshError::Connection {
                message: format!("failed to launch ssh: {err}"),
            })?;
        Ok(SshCommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Run a command on the target with stdio inherited, so long-running
    /// remote processes stream straight to the operator's terminal.
    pub fn execute_interactive(&self, target: &SshTarget, command: &str) -> Result<i32, SshError> {
        let status = self
            .ssh_command(target)
            .arg(command)
            .status()
            .map_err(|err| SshError::Connection {
                message: format!("failed to launch ssh: {err}"),
            })?;
        Ok(status.code().unwrap_or(-1))
    }

    /// Upload a local file to `remote_path` on the target via scp. Unlike
    /// `execute`, a failed transfer is an error: callers treat uploads as
    /// preconditions for the steps that follow.
    pub fn upload(
        &self,
        target: &SshTarget,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), SshError> {
        let dest = format!("{}:{}", target.destination(), remote_path);
        let output = self
            .scp_command(target)
            .arg(local_path)
            .arg(&dest)
            .output()
            .map_err(|err| SshError::Transfer {
                message: format!("failed to launch scp: {err}"),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SshError::Transfer {
                message: format!(
                    "scp {} -> {dest} exited with {}: {}",
                    local_path.display(),
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            })
        }
    }

    /// Check that the transport is reachable and authenticated.
    pub fn test_connection(&self, target: &SshTarget) -> bool {
        match self.execute(target, "echo ok") {
            Ok(result) => result.exit_code == 0,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SshTarget {
        SshTarget {
            host: "server.example.com".to_string(),
            user: "deploy".to_string(),
            port: 2222,
            identity_file: Some(PathBuf::from("/home/op/.ssh/id_ed25519")),
        }
    }

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn destination_is_user_at_host() {
        assert_eq!(target().destination(), "deploy@server.example.com");
    }

    #[test]
    fn ssh_command_carries_connection_parameters() {
        let client = ProcessSshClient::new();
        let cmd = client.ssh_command(&target());
        let args = args_of(&cmd);
        assert!(args.contains(&"StrictHostKeyChecking=accept-new".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        let port_pos = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[port_pos + 1], "2222");
        let identity_pos = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[identity_pos + 1], "/home/op/.ssh/id_ed25519");
        assert_eq!(args.last().unwrap(), "deploy@server.example.com");
    }

    #[test]
    fn scp_uses_capital_port_flag() {
        let client = ProcessSshClient::new();
        let cmd = client.scp_command(&target());
        let args = args_of(&cmd);
        assert!(!args.contains(&"-p".to_string()));
        let port_pos = args.iter().position(|a| a == "-P").unwrap();
        assert_eq!(args[port_pos + 1], "2222");
    }

    #[test]
    fn omits_identity_flag_without_key() {
        let client = ProcessSshClient::new();
        let mut no_key = target();
        no_key.identity_file = None;
        let args = args_of(&client.ssh_command(&no_key));
        assert!(!args.contains(&"-i".to_string()));
    }
}
