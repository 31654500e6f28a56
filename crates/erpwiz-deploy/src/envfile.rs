//! Rendering and installation of the `.env` file consumed by the stack.

use std::io::Write;
use std::path::{Path, PathBuf};

use erpwiz_core_domain::{frappe_branch, DeployConfig, DeployMode};
use erpwiz_exec::Executor;

use crate::compose::REMOTE_PROJECT_DIR;
use crate::DeployError;

pub const ENV_FILE: &str = ".env";

fn needs_quoting(value: &str) -> bool {
    value.chars().any(|c| {
        c.is_whitespace() || matches!(c, '"' | '\'' | '$' | '`' | '\\' | '#')
    })
}

/// Quote a value for the compose env parser: double-quote wrapping with
/// backslash escapes for backslash, double quote, dollar, backtick and
/// newline. Plain values pass through untouched.
pub fn quote_env_value(value: &str) -> String {
    if !needs_quoting(value) {
        return value.to_string();
    }
    let mut quoted = String::from("\"");
    for ch in value.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '$' => quoted.push_str("\\$"),
            '`' => quoted.push_str("\\`"),
            '\n' => quoted.push_str("\\n"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

/// Render the env file contents from configuration.
pub fn render_env(cfg: &DeployConfig) -> String {
    let letsencrypt_email = if cfg.letsencrypt_email.is_empty() {
        "mail@example.com"
    } else {
        &cfg.letsencrypt_email
    };
    format!(
        "ERPNEXT_VERSION={}\n\
         FRAPPE_VERSION={}\n\
         DB_PASSWORD={}\n\
         FRAPPE_SITE_NAME_HEADER={}\n\
         HTTP_PUBLISH_PORT={}\n\
         LETSENCRYPT_EMAIL={}\n",
        cfg.erpnext_version,
        frappe_branch(&cfg.erpnext_version),
        quote_env_value(&cfg.db_password),
        cfg.site_name,
        cfg.http_port,
        quote_env_value(letsencrypt_email),
    )
}

/// Write `dir/.env` atomically: the content lands in a temp file in the
/// same directory first and is renamed over the target, so an interrupt
/// mid-write can never leave a truncated file where a valid one was.
pub fn write_env_atomic(dir: &Path, content: &str) -> std::io::Result<PathBuf> {
    let target = dir.join(ENV_FILE);
    let tmp = dir.join(".env.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, &target)?;
    Ok(target)
}

/// Put the rendered env file in place: into the current checkout for local
/// and production deployments, uploaded into the remote checkout otherwise.
pub fn install_env(cfg: &DeployConfig, exec: &dyn Executor) -> Result<(), DeployError> {
    let content = render_env(cfg);
    if cfg.deploy_mode == DeployMode::Remote {
        let tmpdir = std::env::temp_dir();
        let staged = write_env_atomic(&tmpdir, &content)?;
        let result = exec.upload(&staged, &format!("{REMOTE_PROJECT_DIR}/{ENV_FILE}"));
        let _ = std::fs::remove_file(&staged);
        result?;
    } else {
        write_env_atomic(Path::new("."), &content)?;
    }
    Ok(())
}
