//! Custom image builds via frappe_docker's layered build: the app list is
//! passed base64-encoded through the `APPS_JSON_BASE64` build argument.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use erpwiz_core_domain::{DeployConfig, DeployMode};
use erpwiz_exec::{shell_quote, Executor};
use serde_json::json;

use crate::compose::ComposeProject;
use crate::DeployError;

pub const DEFAULT_IMAGE_TAG: &str = "custom-erpnext:latest";
const CONTAINERFILE: &str = "images/custom/Containerfile";

/// Render the apps.json document the image build bakes in: erpnext pinned
/// to the chosen release, official extras and community/custom apps on
/// their resolved branches.
pub fn apps_json(cfg: &DeployConfig) -> String {
    let default_branch = cfg.default_app_branch();
    let mut apps = vec![json!({
        "url": "https://github.com/frappe/erpnext",
        "branch": cfg.erpnext_version,
    })];
    for name in &cfg.extra_apps {
        let branch = cfg
            .app_branches
            .get(name)
            .cloned()
            .unwrap_or_else(|| default_branch.clone());
        apps.push(json!({
            "url": format!("https://github.com/frappe/{name}"),
            "branch": branch,
        }));
    }
    for app in &cfg.community_apps {
        apps.push(json!({ "url": app.repo_url, "branch": app.branch }));
    }
    for app in &cfg.custom_apps {
        apps.push(json!({ "url": app.url, "branch": app.branch }));
    }
    serde_json::to_string(&apps).unwrap_or_else(|_| "[]".to_string())
}

pub fn image_tag(cfg: &DeployConfig) -> String {
    cfg.image_tag
        .clone()
        .unwrap_or_else(|| DEFAULT_IMAGE_TAG.to_string())
}

fn build_command(cfg: &DeployConfig) -> String {
    let encoded = STANDARD.encode(apps_json(cfg));
    format!(
        "docker build --build-arg=APPS_JSON_BASE64={encoded} \
         --build-arg=FRAPPE_BRANCH={} -t {} -f {CONTAINERFILE} .",
        shell_quote(&cfg.default_app_branch()),
        shell_quote(&image_tag(cfg)),
    )
}

/// Build the custom image inside the checkout on the target host. The build
/// is a hard prerequisite for the stack that references the tag, so a
/// failure is fatal.
pub fn build_image(
    cfg: &DeployConfig,
    exec: &dyn Executor,
    project: &ComposeProject,
) -> Result<(), DeployError> {
    let cmd = if cfg.deploy_mode == DeployMode::Remote {
        project.host(&build_command(cfg))
    } else {
        build_command(cfg)
    };
    if exec.run(&cmd)? != 0 {
        return Err(DeployError::ImageBuildFailed);
    }
    Ok(())
}
