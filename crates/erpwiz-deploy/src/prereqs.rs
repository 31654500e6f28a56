//! Prerequisite verification: required tools and the frappe_docker checkout.
//!
//! Everything runs through the executor, so the same checks apply to a
//! remote host. For remote deployments the transport is probed first; tool
//! checks against an unreachable host would be meaningless.

use std::path::Path;

use erpwiz_core_domain::{DeployConfig, DeployMode};
use erpwiz_exec::Executor;

use crate::compose::{BASE_FILE, REMOTE_PROJECT_DIR};
use crate::DeployError;

const TEMPLATES_REPO: &str = "https://github.com/frappe/frappe_docker";
const CHECKOUT_DIR: &str = "frappe_docker";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prereqs {
    pub docker_version: String,
    pub compose_version: String,
}

/// Check a tool by running its version command; returns the trimmed
/// version string or a `MissingTool` error.
pub fn check_tool(
    exec: &dyn Executor,
    name: &str,
    version_cmd: &str,
) -> Result<String, DeployError> {
    let output = exec.run_captured(version_cmd)?;
    if output.success() {
        Ok(output.stdout.trim().to_string())
    } else {
        Err(DeployError::MissingTool {
            name: name.to_string(),
        })
    }
}

/// Verify tools and ensure the deployment templates are checked out on the
/// target. Local runs change into the checkout directory so subsequent
/// compose commands find the files; remote runs rely on the `cd` prefix of
/// every remote command instead.
pub fn verify(cfg: &DeployConfig, exec: &dyn Executor) -> Result<Prereqs, DeployError> {
    if cfg.deploy_mode == DeployMode::Remote && !exec.test_connection() {
        let host = cfg.ssh.as_ref().map(|s| s.host.clone()).unwrap_or_default();
        return Err(DeployError::HostUnreachable { host });
    }

    let docker_version = check_tool(exec, "Docker", "docker --version")?;
    let compose_version = check_tool(exec, "Docker Compose", "docker compose version")?;

    if cfg.deploy_mode == DeployMode::Remote {
        ensure_remote_checkout(exec)?;
    } else {
        ensure_local_checkout(exec)?;
    }

    Ok(Prereqs {
        docker_version,
        compose_version,
    })
}

/// Lightweight entry for maintenance commands against an already-deployed
/// stack: skip the tool checks but still make sure subsequent commands run
/// inside the checkout. Remote commands carry their own `cd` prefix, so
/// only reachability is probed there.
pub fn enter_checkout(cfg: &DeployConfig, exec: &dyn Executor) -> Result<(), DeployError> {
    if cfg.deploy_mode == DeployMode::Remote {
        if !exec.test_connection() {
            let host = cfg.ssh.as_ref().map(|s| s.host.clone()).unwrap_or_default();
            return Err(DeployError::HostUnreachable { host });
        }
        return Ok(());
    }
    ensure_local_checkout(exec)
}

fn ensure_remote_checkout(exec: &dyn Executor) -> Result<(), DeployError> {
    let probe = exec.run_captured(&format!("test -f {REMOTE_PROJECT_DIR}/{BASE_FILE}"))?;
    if probe.success() {
        return Ok(());
    }
    check_tool(exec, "Git", "git --version")?;
    let code = exec.run(&format!("git clone {TEMPLATES_REPO} {REMOTE_PROJECT_DIR}"))?;
    if code != 0 {
        return Err(DeployError::TemplateCheckoutFailed);
    }
    Ok(())
}

fn ensure_local_checkout(exec: &dyn Executor) -> Result<(), DeployError> {
    if Path::new(BASE_FILE).exists() {
        return Ok(());
    }
    if !Path::new(CHECKOUT_DIR).exists() {
        check_tool(exec, "Git", "git --version")?;
        let code = exec.run(&format!("git clone {TEMPLATES_REPO}"))?;
        if code != 0 {
            return Err(DeployError::TemplateCheckoutFailed);
        }
    }
    std::env::set_current_dir(CHECKOUT_DIR)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedExecutor;
    use erpwiz_core_domain::SshAccess;

    fn remote_config() -> DeployConfig {
        DeployConfig {
            deploy_mode: DeployMode::Remote,
            site_name: "erp.example.com".to_string(),
            erpnext_version: "v16.7.3".to_string(),
            domain: "erp.example.com".to_string(),
            letsencrypt_email: "a@b.com".to_string(),
            db_password: "secret".to_string(),
            admin_password: "secret".to_string(),
            ssh: Some(SshAccess {
                host: "192.168.1.100".to_string(),
                user: "root".to_string(),
                port: 22,
                key_path: None,
            }),
            ..DeployConfig::default()
        }
    }

    #[test]
    fn unreachable_host_fails_before_any_tool_check() {
        let mut exec = ScriptedExecutor::new();
        exec.remote = true;
        exec.reachable = false;
        let err = verify(&remote_config(), &exec).unwrap_err();
        assert!(matches!(err, DeployError::HostUnreachable { ref host } if host == "192.168.1.100"));
        assert!(exec.command_log().is_empty());
    }

    #[test]
    fn missing_docker_is_fatal() {
        let mut exec = ScriptedExecutor::new();
        exec.remote = true;
        exec.push_captured(127, "");
        let err = verify(&remote_config(), &exec).unwrap_err();
        assert!(matches!(err, DeployError::MissingTool { ref name } if name == "Docker"));
    }

    #[test]
    fn clones_templates_on_remote_when_absent() {
        let mut exec = ScriptedExecutor::new();
        exec.remote = true;
        exec.push_captured(0, "Docker version 27.0.1");
        exec.push_captured(0, "Docker Compose version v2.29.0");
        exec.push_captured(1, ""); // test -f compose.yaml
        exec.push_captured(0, "git version 2.45.0");
        verify(&remote_config(), &exec).unwrap();
        let log = exec.command_log();
        assert!(log
            .last()
            .unwrap()
            .starts_with("git clone https://github.com/frappe/frappe_docker"));
    }

    #[test]
    fn maintenance_entry_only_probes_remote_reachability() {
        let mut exec = ScriptedExecutor::new();
        exec.remote = true;
        enter_checkout(&remote_config(), &exec).unwrap();
        assert!(exec.command_log().is_empty());
    }

    #[test]
    fn maintenance_entry_fails_on_unreachable_host() {
        let mut exec = ScriptedExecutor::new();
        exec.remote = true;
        exec.reachable = false;
        let err = enter_checkout(&remote_config(), &exec).unwrap_err();
        assert!(matches!(err, DeployError::HostUnreachable { .. }));
    }

    #[test]
    fn failed_remote_clone_is_fatal() {
        let mut exec = ScriptedExecutor::with_run_results([128]);
        exec.remote = true;
        exec.push_captured(0, "Docker version 27.0.1");
        exec.push_captured(0, "Docker Compose version v2.29.0");
        exec.push_captured(1, "");
        exec.push_captured(0, "git version 2.45.0");
        let err = verify(&remote_config(), &exec).unwrap_err();
        assert!(matches!(err, DeployError::TemplateCheckoutFailed));
    }
}
