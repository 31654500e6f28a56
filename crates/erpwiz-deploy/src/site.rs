//! Post-deploy bootstrap: site creation and app installation.
//!
//! App installation is fail-soft per app; site creation is retried only
//! with explicit operator consent, one confirmation per attempt.

use erpwiz_core_domain::{DbType, DeployConfig};
use erpwiz_exec::{shell_quote, Executor};

use crate::compose::ComposeProject;
use crate::DeployError;

/// One app to install: the argument handed to `bench get-app` (a repo name
/// for official apps, a git URL otherwise) plus the resolved branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSpec {
    pub name: String,
    pub source: String,
    pub branch: Option<String>,
}

impl AppSpec {
    /// Official app living under github.com/frappe.
    pub fn official(name: &str, branch: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            source: name.to_string(),
            branch,
        }
    }

    pub fn from_repo(name: &str, url: &str, branch: &str) -> Self {
        Self {
            name: name.to_string(),
            source: url.to_string(),
            branch: Some(branch.to_string()),
        }
    }
}

/// Create the site via `bench new-site`. On failure the operator decides,
/// one explicit confirmation per retry; declining aborts the run.
pub fn create_site(
    exec: &dyn Executor,
    project: &ComposeProject,
    site: &str,
    cfg: &DeployConfig,
    admin_password: &str,
    confirm_retry: &mut dyn FnMut() -> bool,
) -> Result<(), DeployError> {
    let mut cmd = format!(
        "exec backend bench new-site {} --install-app erpnext --db-root-password {} --admin-password {}",
        shell_quote(site),
        shell_quote(&cfg.db_password),
        shell_quote(admin_password),
    );
    if cfg.db_type == DbType::Postgres {
        cmd.push_str(" --db-type postgres");
    }
    let cmd = project.plain(&cmd);

    loop {
        if exec.run(&cmd)? == 0 {
            return Ok(());
        }
        if !confirm_retry() {
            return Err(DeployError::SiteCreationAborted);
        }
    }
}

/// Secondary-site variant of [`create_site`]: an operator abort becomes a
/// reported failure so the remaining pipeline stages still run. Transport
/// failures propagate unchanged.
pub fn create_site_fail_soft(
    exec: &dyn Executor,
    project: &ComposeProject,
    site: &str,
    cfg: &DeployConfig,
    admin_password: &str,
    confirm_retry: &mut dyn FnMut() -> bool,
) -> Result<bool, DeployError> {
    match create_site(exec, project, site, cfg, admin_password, confirm_retry) {
        Ok(()) => Ok(true),
        Err(DeployError::SiteCreationAborted) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Enable the task scheduler for a site. Non-fatal: the site works without
/// it, so the caller just warns on failure.
pub fn enable_scheduler(
    exec: &dyn Executor,
    project: &ComposeProject,
    site: &str,
) -> Result<bool, DeployError> {
    let cmd = project.plain(&format!(
        "exec backend bench --site {} enable-scheduler",
        shell_quote(site)
    ));
    Ok(exec.run(&cmd)? == 0)
}

/// Shell snippet that appends an app to the install manifest only if it is
/// not already listed, so re-running it is safe.
pub fn manifest_guard(app_name: &str) -> String {
    format!("grep -qxF {app_name} sites/apps.txt || echo {app_name} >> sites/apps.txt")
}

/// Install one app through the fixed six-step sub-pipeline. Any step
/// failure short-circuits the remaining steps for this app and reports
/// `false`; other apps are unaffected. Transport failures still propagate.
///
/// The production containers need the explicit pip-install and manifest
/// registration because `bench get-app` only clones the repository there.
pub fn install_app(
    exec: &dyn Executor,
    project: &ComposeProject,
    site: &str,
    app: &AppSpec,
) -> Result<bool, DeployError> {
    let name = &app.name;
    let site_q = shell_quote(site);

    // 1. Fetch the app source at the resolved branch.
    let branch_arg = match &app.branch {
        Some(branch) => format!("--branch {} ", shell_quote(branch)),
        None => String::new(),
    };
    let get_app = project.plain(&format!(
        "exec backend bench get-app {branch_arg}{}",
        shell_quote(&app.source)
    ));
    if exec.run(&get_app)? != 0 {
        return Ok(false);
    }

    // 2. Install the dependency closure in editable mode.
    let pip = project.plain(&format!("exec backend pip install -e apps/{name}"));
    if exec.run(&pip)? != 0 {
        return Ok(false);
    }

    // 3. Register in the install manifest, idempotently.
    let register = project.plain(&format!("exec backend bash -c '{}'", manifest_guard(name)));
    if exec.run(&register)? != 0 {
        return Ok(false);
    }

    // 4. Install onto the site.
    let install = project.plain(&format!(
        "exec backend bench --site {site_q} install-app {name}"
    ));
    if exec.run(&install)? != 0 {
        return Ok(false);
    }

    // 5. Build static assets.
    let build = project.plain(&format!("exec backend bench build --app {name}"));
    if exec.run(&build)? != 0 {
        return Ok(false);
    }

    // 6. bench build leaves sites/assets/{app} as a symlink into apps/,
    // which the frontend container cannot see. Materialize the target.
    let copy_assets = project.plain(&format!(
        "exec backend bash -c 'if [ -L sites/assets/{name} ]; then \
         target=$(readlink sites/assets/{name}) && \
         rm sites/assets/{name} && \
         cp -r \"$target\" sites/assets/{name}; fi'"
    ));
    Ok(exec.run(&copy_assets)? == 0)
}

/// Install an already-fetched app onto another site (used for secondary
/// sites; the source fetch from the primary installation is reused).
pub fn install_app_on_site(
    exec: &dyn Executor,
    project: &ComposeProject,
    site: &str,
    app_name: &str,
) -> Result<bool, DeployError> {
    let cmd = project.plain(&format!(
        "exec backend bench --site {} install-app {app_name}",
        shell_quote(site)
    ));
    Ok(exec.run(&cmd)? == 0)
}

/// Restart the serving frontend so newly built assets are picked up.
pub fn restart_frontend(exec: &dyn Executor, project: &ComposeProject) -> Result<bool, DeployError> {
    Ok(exec.run(&project.plain("restart frontend"))? == 0)
}

/// Run the bench diagnostic against a site. Advisory only; runs after the
/// pipeline has already committed to success.
pub fn doctor(
    exec: &dyn Executor,
    project: &ComposeProject,
    site: &str,
) -> Result<bool, DeployError> {
    let cmd = project.plain(&format!(
        "exec backend bench --site {} doctor",
        shell_quote(site)
    ));
    Ok(exec.run(&cmd)? == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedExecutor;
    use std::process::Command;

    fn local_project() -> ComposeProject {
        let cfg = DeployConfig {
            site_name: "mysite.localhost".to_string(),
            erpnext_version: "v16.7.3".to_string(),
            db_password: "secret".to_string(),
            admin_password: "secret".to_string(),
            ..DeployConfig::default()
        };
        ComposeProject::from_config(&cfg)
    }

    fn local_config() -> DeployConfig {
        DeployConfig {
            site_name: "mysite.localhost".to_string(),
            erpnext_version: "v16.7.3".to_string(),
            db_password: "db-secret".to_string(),
            admin_password: "admin-secret".to_string(),
            ..DeployConfig::default()
        }
    }

    #[test]
    fn create_site_passes_credentials_and_engine_flag() {
        let exec = ScriptedExecutor::new();
        let mut cfg = local_config();
        cfg.db_type = DbType::Postgres;
        let mut never = || -> bool { panic!("no retry expected") };
        create_site(
            &exec,
            &local_project(),
            "mysite.localhost",
            &cfg,
            "admin-secret",
            &mut never,
        )
        .unwrap();
        let cmd = &exec.command_log()[0];
        assert!(cmd.contains("bench new-site 'mysite.localhost'"));
        assert!(cmd.contains("--db-root-password 'db-secret'"));
        assert!(cmd.contains("--admin-password 'admin-secret'"));
        assert!(cmd.contains("--db-type postgres"));
    }

    #[test]
    fn create_site_retries_only_with_consent() {
        let exec = ScriptedExecutor::with_run_results([1, 1, 0]);
        let mut answers = vec![true, true].into_iter();
        let mut confirm = || answers.next().unwrap();
        create_site(
            &exec,
            &local_project(),
            "mysite.localhost",
            &local_config(),
            "admin-secret",
            &mut confirm,
        )
        .unwrap();
        assert_eq!(exec.command_log().len(), 3);
        assert!(answers.next().is_none(), "every retry consumed a confirmation");
    }

    #[test]
    fn create_site_aborts_when_operator_declines() {
        let exec = ScriptedExecutor::with_run_results([1]);
        let mut decline = || false;
        let err = create_site(
            &exec,
            &local_project(),
            "mysite.localhost",
            &local_config(),
            "admin-secret",
            &mut decline,
        )
        .unwrap_err();
        assert!(matches!(err, DeployError::SiteCreationAborted));
        assert_eq!(exec.command_log().len(), 1);
    }

    #[test]
    fn declined_secondary_site_reports_failure_without_aborting() {
        let exec = ScriptedExecutor::with_run_results([1]);
        let mut decline = || false;
        let ok = create_site_fail_soft(
            &exec,
            &local_project(),
            "crm.localhost",
            &local_config(),
            "admin-secret",
            &mut decline,
        )
        .unwrap();
        assert!(!ok);
    }

    #[test]
    fn secondary_site_retry_still_asks_the_operator() {
        let exec = ScriptedExecutor::with_run_results([1, 0]);
        let mut answers = vec![true].into_iter();
        let mut confirm = || answers.next().unwrap();
        let ok = create_site_fail_soft(
            &exec,
            &local_project(),
            "crm.localhost",
            &local_config(),
            "admin-secret",
            &mut confirm,
        )
        .unwrap();
        assert!(ok);
        assert_eq!(exec.command_log().len(), 2);
    }

    #[test]
    fn install_app_runs_six_steps_in_order() {
        let exec = ScriptedExecutor::new();
        let app = AppSpec::official("hrms", Some("version-16".to_string()));
        let ok = install_app(&exec, &local_project(), "mysite.localhost", &app).unwrap();
        assert!(ok);
        let log = exec.command_log();
        assert_eq!(log.len(), 6);
        assert!(log[0].contains("bench get-app --branch 'version-16' 'hrms'"));
        assert!(log[1].contains("pip install -e apps/hrms"));
        assert!(log[2].contains("grep -qxF hrms sites/apps.txt"));
        assert!(log[3].contains("install-app hrms"));
        assert!(log[4].contains("bench build --app hrms"));
        assert!(log[5].contains("readlink sites/assets/hrms"));
    }

    #[test]
    fn install_failure_short_circuits_build_and_copy() {
        // Step 4 (install onto site) fails; steps 5 and 6 must not run.
        let exec = ScriptedExecutor::with_run_results([0, 0, 0, 1]);
        let app = AppSpec::official("wiki", None);
        let ok = install_app(&exec, &local_project(), "mysite.localhost", &app).unwrap();
        assert!(!ok);
        let log = exec.command_log();
        assert_eq!(log.len(), 4);
        assert!(!log.iter().any(|c| c.contains("bench build")));
    }

    #[test]
    fn get_app_without_branch_omits_flag() {
        let exec = ScriptedExecutor::with_run_results([1]);
        let app = AppSpec::official("payments", None);
        install_app(&exec, &local_project(), "mysite.localhost", &app).unwrap();
        assert!(exec.command_log()[0].contains("bench get-app 'payments'"));
    }

    #[test]
    fn manifest_registration_is_idempotent() {
        // Run the real guard twice against a scratch manifest.
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sites")).unwrap();
        std::fs::write(dir.path().join("sites/apps.txt"), "frappe\nerpnext\n").unwrap();

        for _ in 0..2 {
            let status = Command::new("sh")
                .arg("-c")
                .arg(manifest_guard("hrms"))
                .current_dir(dir.path())
                .status()
                .unwrap();
            assert!(status.success());
        }

        let manifest = std::fs::read_to_string(dir.path().join("sites/apps.txt")).unwrap();
        let count = manifest.lines().filter(|l| *l == "hrms").count();
        assert_eq!(count, 1);
    }
}
