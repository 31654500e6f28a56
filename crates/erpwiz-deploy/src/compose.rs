//! Compose file selection and container bring-up.
//!
//! File order matters: later files override earlier ones when compose merges
//! them, so the base file always comes first and overlays follow in a fixed
//! base-then-specialization order.

use std::io::Write;
use std::time::{Duration, Instant};

use erpwiz_core_domain::{DbType, DeployConfig, DeployMode};
use erpwiz_exec::Executor;

use crate::DeployError;

pub const BASE_FILE: &str = "compose.yaml";
pub const MARIADB_OVERLAY: &str = "overrides/compose.mariadb.yaml";
pub const POSTGRES_OVERLAY: &str = "overrides/compose.postgres.yaml";
pub const REDIS_OVERLAY: &str = "overrides/compose.redis.yaml";
pub const NOPROXY_OVERLAY: &str = "overrides/compose.noproxy.yaml";
pub const HTTPS_OVERLAY: &str = "overrides/compose.https.yaml";
pub const BACKUP_CRON_OVERLAY: &str = "overrides/compose.backup-cron.yaml";
pub const PORTAINER_OVERLAY: &str = "compose.portainer.yaml";

/// Remote deployments keep the checkout in the login user's home.
pub const REMOTE_PROJECT_DIR: &str = "~/frappe_docker";

const PORTAINER_CONTENT: &str = "\
services:
  portainer:
    image: portainer/portainer-ce:latest
    restart: unless-stopped
    ports:
      - \"9443:9443\"
    volumes:
      - /var/run/docker.sock:/var/run/docker.sock
      - portainer_data:/data

volumes:
  portainer_data:
";

/// Derive the ordered list of compose files for a configuration.
pub fn select_files(cfg: &DeployConfig) -> Vec<&'static str> {
    let mut files = vec![BASE_FILE];

    files.push(match cfg.db_type {
        DbType::Postgres => POSTGRES_OVERLAY,
        DbType::Mariadb => MARIADB_OVERLAY,
    });

    files.push(REDIS_OVERLAY);

    files.push(if cfg.deploy_mode == DeployMode::Local {
        NOPROXY_OVERLAY
    } else {
        HTTPS_OVERLAY
    });

    if cfg.backup_cron {
        files.push(BACKUP_CRON_OVERLAY);
    }
    if cfg.enable_portainer {
        files.push(PORTAINER_OVERLAY);
    }

    files
}

/// Command builder for one compose project. Remote commands are prefixed
/// with a `cd` into the checkout because each ssh session starts in the
/// login user's home.
#[derive(Debug, Clone)]
pub struct ComposeProject {
    files: Vec<String>,
    remote: bool,
}

impl ComposeProject {
    pub fn from_config(cfg: &DeployConfig) -> Self {
        Self {
            files: select_files(cfg).iter().map(|f| f.to_string()).collect(),
            remote: cfg.deploy_mode == DeployMode::Remote,
        }
    }

    fn prefix(&self) -> &'static str {
        if self.remote {
            "cd ~/frappe_docker && "
        } else {
            ""
        }
    }

    /// Full command with the selected `-f` files, e.g. for up/down/ps.
    pub fn compose(&self, tail: &str) -> String {
        let file_args: Vec<String> = self.files.iter().map(|f| format!("-f {f}")).collect();
        format!("{}docker compose {} {tail}", self.prefix(), file_args.join(" "))
    }

    /// Command against the running project without `-f` files, e.g. for
    /// exec/restart once the stack is up.
    pub fn plain(&self, tail: &str) -> String {
        format!("{}docker compose {tail}", self.prefix())
    }

    /// Plain host command run inside the checkout, e.g. reading the env
    /// file or a docker build. Not a compose subcommand.
    pub fn host(&self, tail: &str) -> String {
        format!("{}{tail}", self.prefix())
    }
}

#[derive(Debug, Clone)]
pub struct HealthPoll {
    pub interval: Duration,
    pub budget: Duration,
}

impl Default for HealthPoll {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            budget: Duration::from_secs(120),
        }
    }
}

/// Wall-clock wait used when health polling cannot confirm readiness.
/// Remote stacks get a little longer to account for slower first pulls.
pub fn fallback_duration(mode: DeployMode) -> Duration {
    match mode {
        DeployMode::Remote => Duration::from_secs(35),
        _ => Duration::from_secs(25),
    }
}

/// True when the status output reports at least one service and every
/// service state is `running`. Anything unparsable counts as not ready.
fn all_running(stdout: &str) -> bool {
    let mut services = 0;
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => return false,
        };
        if value.get("State").and_then(|s| s.as_str()) != Some("running") {
            return false;
        }
        services += 1;
    }
    services > 0
}

/// Poll `ps --format json` until every service reports running or the
/// budget elapses. Transport failures propagate; a failing status command
/// just counts against the budget.
pub fn wait_for_healthy(
    exec: &dyn Executor,
    project: &ComposeProject,
    poll: &HealthPoll,
) -> Result<bool, DeployError> {
    let deadline = Instant::now() + poll.budget;
    loop {
        let output = exec.run_captured(&project.compose("ps --format json"))?;
        if output.success() && all_running(&output.stdout) {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        std::thread::sleep(poll.interval);
    }
}

/// Second-granularity wait with progress feedback for the operator.
pub fn timed_wait(duration: Duration) {
    let mut stdout = std::io::stdout();
    for _ in 0..duration.as_secs() {
        let _ = write!(stdout, ".");
        let _ = stdout.flush();
        std::thread::sleep(Duration::from_secs(1));
    }
    let _ = writeln!(stdout);
}

/// Bring the stack up: tear down any prior state, start detached, then
/// confirm health. Teardown or start failure is fatal; an inconclusive
/// health poll falls back to a fixed wait and proceeds optimistically.
/// Returns whether health was actually confirmed.
pub fn apply(
    exec: &dyn Executor,
    project: &ComposeProject,
    poll: &HealthPoll,
    fallback: Duration,
) -> Result<bool, DeployError> {
    if exec.run(&project.compose("down"))? != 0 {
        return Err(DeployError::ComposeDownFailed);
    }
    if exec.run(&project.compose("up -d"))? != 0 {
        return Err(DeployError::ComposeUpFailed);
    }
    if wait_for_healthy(exec, project, poll)? {
        return Ok(true);
    }
    timed_wait(fallback);
    Ok(false)
}

/// Write the portainer overlay next to the compose files, uploading it for
/// remote deployments.
pub fn write_portainer_overlay(exec: &dyn Executor, cfg: &DeployConfig) -> Result<(), DeployError> {
    if cfg.deploy_mode == DeployMode::Remote {
        let tmp = std::env::temp_dir().join(format!("erpwiz-portainer-{}.yaml", std::process::id()));
        std::fs::write(&tmp, PORTAINER_CONTENT)?;
        let result = exec.upload(&tmp, &format!("{REMOTE_PROJECT_DIR}/{PORTAINER_OVERLAY}"));
        let _ = std::fs::remove_file(&tmp);
        result?;
    } else {
        std::fs::write(PORTAINER_OVERLAY, PORTAINER_CONTENT)?;
    }
    Ok(())
}
