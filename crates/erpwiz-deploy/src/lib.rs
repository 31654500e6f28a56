//! The deployment pipeline: prerequisite checks, env file rendering,
//! compose orchestration and post-deploy site bootstrapping. All stages run
//! through the [`erpwiz_exec::Executor`] abstraction so the same code drives
//! local and remote deployments.

pub mod compose;
pub mod envfile;
pub mod hosts;
pub mod image;
pub mod integrations;
pub mod prereqs;
pub mod site;
pub mod upgrade;

use erpwiz_exec::ExecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("required tool not found: {name}")]
    MissingTool { name: String },
    #[error("cannot reach remote host {host} over ssh")]
    HostUnreachable { host: String },
    #[error("failed to clone the frappe_docker deployment templates")]
    TemplateCheckoutFailed,
    #[error("docker compose down failed; refusing to build on a dirty stack")]
    ComposeDownFailed,
    #[error("docker compose up failed")]
    ComposeUpFailed,
    #[error("site creation aborted by operator")]
    SiteCreationAborted,
    #[error("custom image build failed")]
    ImageBuildFailed,
}
