//! Uniform command execution on the deployment target.
//!
//! Every pipeline stage is written once against the [`Executor`] trait; the
//! local/remote decision is made exactly once, in [`create_executor`].
//! Command strings are run through a shell on the target and must already be
//! quoted by the caller (see [`shell_quote`]); executors never quote.
//!
//! A non-zero exit code is the failure signal and is returned as data. Only
//! transport-level trouble (cannot spawn the subprocess, cannot reach the
//! host) surfaces as [`ExecError`].

use std::path::Path;
use std::process::Command;

use erpwiz_core_domain::{DeployConfig, DeployMode};
use erpwiz_ssh::{ProcessSshClient, SshError, SshTarget};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Ssh(#[from] SshError),
    #[error("remote mode selected but no ssh access is configured")]
    MissingRemoteAccess,
}

pub trait Executor {
    /// Run a shell command with output streaming to the operator's
    /// terminal. Returns the exit code.
    fn run(&self, command: &str) -> Result<i32, ExecError>;

    /// Run a shell command capturing stdout and stderr instead of
    /// displaying them.
    fn run_captured(&self, command: &str) -> Result<CommandOutput, ExecError>;

    /// Transfer a local file to `remote_path` on the target. For the local
    /// variant this is a same-host copy. A failed transfer is an error, not
    /// an exit code: callers rely on the file being in place afterwards.
    fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), ExecError>;

    fn is_remote(&self) -> bool {
        false
    }

    /// Whether the target is reachable. Trivially true for the local
    /// variant; the remote variant probes the ssh transport.
    fn test_connection(&self) -> bool {
        true
    }
}

/// Executes directly on the current host through `sh -c`.
#[derive(Debug, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for LocalExecutor {
    fn run(&self, command: &str) -> Result<i32, ExecError> {
        let status = Command::new("sh").arg("-c").arg(command).status()?;
        Ok(status.code().unwrap_or(-1))
    }

    fn run_captured(&self, command: &str) -> Result<CommandOutput, ExecError> {
        let output = Command::new("sh").arg("-c").arg(command).output()?;
        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), ExecError> {
        std::fs::copy(local_path, remote_path)?;
        Ok(())
    }
}

/// Executes on a remote host by tunneling each command through ssh.
pub struct RemoteExecutor {
    client: ProcessSshClient,
    target: SshTarget,
}

impl RemoteExecutor {
    pub fn new(target: SshTarget) -> Self {
        Self {
            client: ProcessSshClient::new(),
            target,
        }
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }
}

impl Executor for RemoteExecutor {
    fn run(&self, command: &str) -> Result<i32, ExecError> {
        Ok(self.client.execute_interactive(&self.target, command)?)
    }

    fn run_captured(&self, command: &str) -> Result<CommandOutput, ExecError> {
        let result = self.client.execute(&self.target, command)?;
        Ok(CommandOutput {
            code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
        })
    }

    fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), ExecError> {
        Ok(self.client.upload(&self.target, local_path, remote_path)?)
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn test_connection(&self) -> bool {
        self.client.test_connection(&self.target)
    }
}

/// The single place where the deploy mode picks an execution substrate.
pub fn create_executor(cfg: &DeployConfig) -> Result<Box<dyn Executor>, ExecError> {
    if cfg.deploy_mode != DeployMode::Remote {
        return Ok(Box::new(LocalExecutor::new()));
    }
    let ssh = cfg.ssh.as_ref().ok_or(ExecError::MissingRemoteAccess)?;
    let target = SshTarget {
        host: ssh.host.clone(),
        user: ssh.user.clone(),
        port: ssh.port,
        identity_file: ssh.key_path.as_ref().map(Into::into),
    };
    Ok(Box::new(RemoteExecutor::new(target)))
}

/// Quote a string for use inside a POSIX shell command line.
pub fn shell_quote(input: &str) -> String {
    let mut quoted = String::from("'");
    for ch in input.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use erpwiz_core_domain::SshAccess;
    use std::io::Write;

    #[test]
    fn shell_quote_wraps_and_escapes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("pa$s wo`rd"), "'pa$s wo`rd'");
        assert_eq!(shell_quote("it's"), r#"'it'\''s'"#);
    }

    #[test]
    fn local_run_reports_exit_code_as_data() {
        let exec = LocalExecutor::new();
        assert_eq!(exec.run_captured("exit 3").unwrap().code, 3);
        assert_eq!(exec.run_captured("true").unwrap().code, 0);
    }

    #[test]
    fn local_run_captured_collects_streams() {
        let exec = LocalExecutor::new();
        let out = exec.run_captured("echo out; echo err >&2").unwrap();
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[test]
    fn local_upload_copies_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        let mut f = std::fs::File::create(&src).unwrap();
        f.write_all(b"payload").unwrap();

        let exec = LocalExecutor::new();
        exec.upload(&src, dst.to_str().unwrap()).unwrap();
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "payload");
    }

    #[test]
    fn factory_branches_on_deploy_mode_once() {
        let mut cfg = DeployConfig {
            site_name: "mysite.localhost".to_string(),
            erpnext_version: "v16.7.3".to_string(),
            ..DeployConfig::default()
        };
        assert!(!create_executor(&cfg).unwrap().is_remote());

        cfg.deploy_mode = DeployMode::Remote;
        assert!(matches!(
            create_executor(&cfg),
            Err(ExecError::MissingRemoteAccess)
        ));

        cfg.ssh = Some(SshAccess {
            host: "192.168.1.100".to_string(),
            user: "root".to_string(),
            port: 22,
            key_path: None,
        });
        assert!(create_executor(&cfg).unwrap().is_remote());
    }
}
