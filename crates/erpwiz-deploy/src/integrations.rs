//! Optional site integrations: outgoing mail and S3-compatible backups.
//!
//! Both write `bench set-config` keys on the running site. Every key is
//! attempted even if an earlier one fails; the result reports whether the
//! whole group went through.

use erpwiz_core_domain::{BackupSettings, MailSettings};
use erpwiz_exec::{shell_quote, Executor};

use crate::compose::ComposeProject;
use crate::DeployError;

fn set_config(
    exec: &dyn Executor,
    project: &ComposeProject,
    site: &str,
    key: &str,
    value: &str,
) -> Result<bool, DeployError> {
    let cmd = project.plain(&format!(
        "exec backend bench --site {} set-config {key} {}",
        shell_quote(site),
        shell_quote(value)
    ));
    Ok(exec.run(&cmd)? == 0)
}

/// Configure SMTP delivery for a site.
pub fn configure_mail(
    exec: &dyn Executor,
    project: &ComposeProject,
    site: &str,
    mail: &MailSettings,
) -> Result<bool, DeployError> {
    let mut ok = true;
    ok &= set_config(exec, project, site, "mail_server", &mail.host)?;
    ok &= set_config(exec, project, site, "mail_port", &mail.port.to_string())?;
    ok &= set_config(
        exec,
        project,
        site,
        "use_tls",
        if mail.use_tls { "1" } else { "0" },
    )?;
    ok &= set_config(exec, project, site, "mail_login", &mail.user)?;
    ok &= set_config(exec, project, site, "mail_password", &mail.password)?;
    Ok(ok)
}

/// Configure the S3-compatible backup target for a site.
pub fn configure_backup(
    exec: &dyn Executor,
    project: &ComposeProject,
    site: &str,
    backup: &BackupSettings,
) -> Result<bool, DeployError> {
    let mut ok = true;
    ok &= set_config(
        exec,
        project,
        site,
        "backup_endpoint_url",
        &backup.s3_endpoint,
    )?;
    ok &= set_config(exec, project, site, "backup_bucket", &backup.s3_bucket)?;
    ok &= set_config(
        exec,
        project,
        site,
        "backup_access_key_id",
        &backup.s3_access_key,
    )?;
    ok &= set_config(
        exec,
        project,
        site,
        "backup_secret_access_key",
        &backup.s3_secret_key,
    )?;
    Ok(ok)
}
