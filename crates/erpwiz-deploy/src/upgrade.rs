//! In-place stack upgrade: rewrite the pinned versions in the deployed
//! `.env`, recreate the containers and migrate every site.

use std::collections::HashMap;

use erpwiz_core_domain::frappe_branch;
use erpwiz_exec::Executor;

use crate::compose::ComposeProject;
use crate::envfile::ENV_FILE;
use crate::DeployError;

/// Parse env-file content into a key/value map. Blank lines and `#`
/// comments are skipped; later assignments win, matching the compose
/// parser. Surrounding double quotes are stripped.
pub fn parse_env(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            vars.insert(key.trim().to_string(), value.to_string());
        }
    }
    vars
}

/// Read the deployed env file through the executor, so the same call works
/// against a remote checkout.
pub fn read_env(
    exec: &dyn Executor,
    project: &ComposeProject,
) -> Result<HashMap<String, String>, DeployError> {
    let output = exec.run_captured(&project.host(&format!("cat {ENV_FILE}")))?;
    if !output.success() {
        return Ok(HashMap::new());
    }
    Ok(parse_env(&output.stdout))
}

/// The version currently deployed, if the env file records one.
pub fn deployed_version(
    exec: &dyn Executor,
    project: &ComposeProject,
) -> Result<Option<String>, DeployError> {
    Ok(read_env(exec, project)?.remove("ERPNEXT_VERSION"))
}

/// Rewrite the pinned version keys in the deployed env file in place. sed
/// runs through the executor so local and remote checkouts are handled the
/// same way.
pub fn set_versions(
    exec: &dyn Executor,
    project: &ComposeProject,
    erpnext_version: &str,
) -> Result<bool, DeployError> {
    let branch = frappe_branch(erpnext_version);
    let cmd = project.host(&format!(
        "sed -i -e 's|^ERPNEXT_VERSION=.*|ERPNEXT_VERSION={erpnext_version}|' \
         -e 's|^FRAPPE_VERSION=.*|FRAPPE_VERSION={branch}|' {ENV_FILE}"
    ));
    Ok(exec.run(&cmd)? == 0)
}

/// Back up every site before touching the deployed version. The backups
/// land in each site's private/backups directory inside the volume.
pub fn backup_all_sites(
    exec: &dyn Executor,
    project: &ComposeProject,
) -> Result<bool, DeployError> {
    let cmd = project.plain("exec backend bench --site all backup");
    Ok(exec.run(&cmd)? == 0)
}

/// Pull the images referenced by the rewritten env file. Failure is
/// reported to the caller; cached images may still carry the bring-up.
pub fn pull_images(
    exec: &dyn Executor,
    project: &ComposeProject,
) -> Result<bool, DeployError> {
    Ok(exec.run(&project.compose("pull"))? == 0)
}

/// Run schema migrations on every site after the containers were recreated
/// at the new version.
pub fn migrate_all_sites(
    exec: &dyn Executor,
    project: &ComposeProject,
) -> Result<bool, DeployError> {
    let cmd = project.plain("exec backend bench --site all migrate");
    Ok(exec.run(&cmd)? == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedExecutor;
    use erpwiz_core_domain::DeployConfig;

    fn project() -> ComposeProject {
        let cfg = DeployConfig {
            site_name: "mysite.localhost".to_string(),
            erpnext_version: "v16.7.3".to_string(),
            db_password: "secret".to_string(),
            admin_password: "secret".to_string(),
            ..DeployConfig::default()
        };
        ComposeProject::from_config(&cfg)
    }

    #[test]
    fn parse_env_handles_comments_quotes_and_overrides() {
        let vars = parse_env(
            "# pinned versions\n\
             ERPNEXT_VERSION=v16.7.2\n\
             ERPNEXT_VERSION=v16.7.3\n\
             DB_PASSWORD=\"pa$s word\"\n\
             \n\
             HTTP_PUBLISH_PORT=8080\n",
        );
        assert_eq!(vars["ERPNEXT_VERSION"], "v16.7.3");
        assert_eq!(vars["DB_PASSWORD"], "pa$s word");
        assert_eq!(vars["HTTP_PUBLISH_PORT"], "8080");
        assert_eq!(vars.len(), 3);
    }

    fn remote_project() -> ComposeProject {
        let cfg = DeployConfig {
            deploy_mode: erpwiz_core_domain::DeployMode::Remote,
            site_name: "erp.example.com".to_string(),
            erpnext_version: "v16.7.3".to_string(),
            domain: "erp.example.com".to_string(),
            db_password: "secret".to_string(),
            admin_password: "secret".to_string(),
            ..DeployConfig::default()
        };
        ComposeProject::from_config(&cfg)
    }

    #[test]
    fn deployed_version_comes_from_env() {
        let exec = ScriptedExecutor::new();
        exec.push_captured(0, "ERPNEXT_VERSION=v16.7.1\nFRAPPE_VERSION=version-16\n");
        let version = deployed_version(&exec, &project()).unwrap();
        assert_eq!(version.as_deref(), Some("v16.7.1"));
        assert_eq!(exec.command_log()[0], "cat .env");
    }

    #[test]
    fn remote_env_read_carries_only_the_checkout_prefix() {
        let exec = ScriptedExecutor::new();
        exec.push_captured(0, "ERPNEXT_VERSION=v16.7.1\n");
        deployed_version(&exec, &remote_project()).unwrap();
        assert_eq!(exec.command_log()[0], "cd ~/frappe_docker && cat .env");
    }

    #[test]
    fn unreadable_env_yields_no_version() {
        let exec = ScriptedExecutor::new();
        exec.push_captured(1, "");
        assert_eq!(deployed_version(&exec, &project()).unwrap(), None);
    }

    #[test]
    fn backup_runs_against_all_sites() {
        let exec = ScriptedExecutor::new();
        assert!(backup_all_sites(&exec, &project()).unwrap());
        assert!(exec.command_log()[0].contains("bench --site all backup"));
    }

    #[test]
    fn set_versions_rewrites_both_keys() {
        let exec = ScriptedExecutor::new();
        assert!(set_versions(&exec, &project(), "v16.8.0").unwrap());
        let cmd = &exec.command_log()[0];
        assert!(cmd.starts_with("sed -i"));
        assert!(cmd.contains("ERPNEXT_VERSION=v16.8.0"));
        assert!(cmd.contains("FRAPPE_VERSION=version-16"));
        assert!(cmd.ends_with(".env"));
    }

    #[test]
    fn remote_env_rewrite_runs_sed_in_the_checkout() {
        let exec = ScriptedExecutor::new();
        assert!(set_versions(&exec, &remote_project(), "v16.8.0").unwrap());
        assert!(exec.command_log()[0].starts_with("cd ~/frappe_docker && sed -i"));
    }

    #[test]
    fn failed_pull_is_reported() {
        let exec = ScriptedExecutor::with_run_results([18]);
        assert!(!pull_images(&exec, &project()).unwrap());
        let cmd = &exec.command_log()[0];
        assert!(cmd.starts_with("docker compose -f compose.yaml"));
        assert!(cmd.ends_with(" pull"));
    }
}
