use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum ERPNext major version the wizard supports.
pub const MIN_SUPPORTED_MAJOR: u32 = 14;

/// Version offered when release discovery is unavailable.
pub const FALLBACK_VERSION: &str = "v16.7.3";

/// Minimum length for the database root and administrator passwords.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Official Frappe apps offered by the wizard: (repo name, display name).
/// Each lives under github.com/frappe/{repo_name}.
pub const OPTIONAL_APPS: &[(&str, &str)] = &[
    ("hrms", "HRMS"),
    ("payments", "Payments"),
    ("healthcare", "Healthcare"),
    ("education", "Education"),
    ("lending", "Lending"),
    ("webshop", "Webshop"),
    ("print_designer", "Print Designer"),
    ("wiki", "Wiki"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMode {
    Local,
    Production,
    Remote,
}

impl DeployMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "local" => Some(DeployMode::Local),
            "production" => Some(DeployMode::Production),
            "remote" => Some(DeployMode::Remote),
            _ => None,
        }
    }

    /// Production and remote deployments terminate TLS via the managed
    /// reverse proxy and need a public domain.
    pub fn needs_domain(self) -> bool {
        matches!(self, DeployMode::Production | DeployMode::Remote)
    }
}

impl fmt::Display for DeployMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeployMode::Local => "local",
            DeployMode::Production => "production",
            DeployMode::Remote => "remote",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbType {
    Mariadb,
    Postgres,
}

impl DbType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "mariadb" => Some(DbType::Mariadb),
            "postgres" | "postgresql" => Some(DbType::Postgres),
            _ => None,
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbType::Mariadb => f.write_str("mariadb"),
            DbType::Postgres => f.write_str("postgres"),
        }
    }
}

/// Connection parameters for a remote deployment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshAccess {
    pub host: String,
    #[serde(default = "default_ssh_user")]
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key_path: Option<String>,
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

/// A community Frappe app discovered from the awesome-frappe index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityApp {
    pub display_name: String,
    pub repo_name: String,
    pub repo_url: String,
    pub branch: String,
}

/// A private app supplied as a repository URL and branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomApp {
    pub url: String,
    pub branch: String,
    pub name: String,
}

impl CustomApp {
    pub fn new(url: &str, branch: &str) -> Self {
        Self {
            url: url.to_string(),
            branch: branch.to_string(),
            name: repo_name_from_url(url),
        }
    }
}

/// Derive the short repository name from a git URL.
pub fn repo_name_from_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    last.trim_end_matches(".git").to_string()
}

/// SMTP relay settings applied to the created site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailSettings {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

/// S3-compatible backup target settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSettings {
    pub s3_endpoint: String,
    pub s3_bucket: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
}

/// A secondary site provisioned alongside the primary one. It shares the
/// database server but gets its own administrator password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraSite {
    pub name: String,
    pub admin_password: String,
}

/// All user-supplied deployment parameters. Built once per run from the
/// interactive wizard, a YAML file or CLI flags; validated once before any
/// side-effecting command is issued, and treated as read-only afterwards.
/// The only post-construction fill-ins are the resolved branches of
/// community and custom apps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    pub deploy_mode: DeployMode,
    pub site_name: String,
    pub erpnext_version: String,
    pub db_type: DbType,
    pub http_port: u16,
    pub db_password: String,
    pub admin_password: String,

    #[serde(default)]
    pub extra_apps: Vec<String>,
    /// Per-app branch overrides, keyed by repo name.
    #[serde(default)]
    pub app_branches: HashMap<String, String>,
    #[serde(default)]
    pub community_apps: Vec<CommunityApp>,
    #[serde(default)]
    pub custom_apps: Vec<CustomApp>,

    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub letsencrypt_email: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ssh: Option<SshAccess>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mail: Option<MailSettings>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub backup: Option<BackupSettings>,

    #[serde(default)]
    pub build_image: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_tag: Option<String>,
    #[serde(default)]
    pub enable_portainer: bool,
    #[serde(default)]
    pub backup_cron: bool,
    #[serde(default)]
    pub extra_sites: Vec<ExtraSite>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            deploy_mode: DeployMode::Local,
            site_name: String::new(),
            erpnext_version: String::new(),
            db_type: DbType::Mariadb,
            http_port: 8080,
            db_password: String::new(),
            admin_password: String::new(),
            extra_apps: Vec::new(),
            app_branches: HashMap::new(),
            community_apps: Vec::new(),
            custom_apps: Vec::new(),
            domain: String::new(),
            letsencrypt_email: String::new(),
            ssh: None,
            mail: None,
            backup: None,
            build_image: false,
            image_tag: None,
            enable_portainer: false,
            backup_cron: false,
            extra_sites: Vec::new(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid site name: {0}")]
    InvalidSiteName(String),
    #[error("invalid version (expected vMAJOR.MINOR.PATCH): {0}")]
    InvalidVersion(String),
    #[error("version {0} is older than the minimum supported v{MIN_SUPPORTED_MAJOR}")]
    UnsupportedVersion(String),
    #[error("{mode} mode requires a domain")]
    MissingDomain { mode: DeployMode },
    #[error("invalid domain: {0}")]
    InvalidDomain(String),
    #[error("{mode} mode requires letsencrypt_email")]
    MissingLetsencryptEmail { mode: DeployMode },
    #[error("invalid letsencrypt_email: {0}")]
    InvalidEmail(String),
    #[error("remote mode requires an ssh host")]
    MissingSshHost,
    #[error("{field} must be at least {MIN_PASSWORD_LEN} characters")]
    PasswordTooShort { field: &'static str },
    #[error("extra site {0}: {1}")]
    ExtraSite(String, Box<ConfigError>),
}

fn hostname_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9]([a-zA-Z0-9\-]*[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9\-]*[a-zA-Z0-9])?)+$",
        )
        .expect("hostname regex")
    })
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^v(\d+)\.(\d+)\.(\d+)$").expect("version regex"))
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"))
}

pub fn is_valid_hostname(value: &str) -> bool {
    hostname_re().is_match(value)
}

pub fn is_valid_email(value: &str) -> bool {
    email_re().is_match(value)
}

/// A stable release version, ordered by (major, minor, patch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReleaseVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ReleaseVersion {
    /// Parse a strict `vMAJOR.MINOR.PATCH` tag. Anything else (betas,
    /// release candidates, bare numbers) is rejected.
    pub fn parse(tag: &str) -> Option<Self> {
        let caps = version_re().captures(tag)?;
        Some(Self {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps[3].parse().ok()?,
        })
    }
}

/// Derive the Frappe framework branch from an ERPNext version string:
/// `v16.7.3` -> `version-16`. Falls back to `version-16` when the string
/// does not parse.
pub fn frappe_branch(erpnext_version: &str) -> String {
    match ReleaseVersion::parse(erpnext_version) {
        Some(version) => format!("version-{}", version.major),
        None => "version-16".to_string(),
    }
}

impl DeployConfig {
    /// Validate the assembled configuration. Called exactly once, after
    /// construction from whichever source, before any command is issued.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_hostname(&self.site_name) {
            return Err(ConfigError::InvalidSiteName(self.site_name.clone()));
        }

        let version = ReleaseVersion::parse(&self.erpnext_version)
            .ok_or_else(|| ConfigError::InvalidVersion(self.erpnext_version.clone()))?;
        if version.major < MIN_SUPPORTED_MAJOR {
            return Err(ConfigError::UnsupportedVersion(self.erpnext_version.clone()));
        }

        if self.db_password.len() < MIN_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooShort { field: "db_password" });
        }
        if self.admin_password.len() < MIN_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooShort {
                field: "admin_password",
            });
        }

        if self.deploy_mode.needs_domain() {
            if self.domain.is_empty() {
                return Err(ConfigError::MissingDomain {
                    mode: self.deploy_mode,
                });
            }
            if !is_valid_hostname(&self.domain) {
                return Err(ConfigError::InvalidDomain(self.domain.clone()));
            }
            if self.letsencrypt_email.is_empty() {
                return Err(ConfigError::MissingLetsencryptEmail {
                    mode: self.deploy_mode,
                });
            }
            if !is_valid_email(&self.letsencrypt_email) {
                return Err(ConfigError::InvalidEmail(self.letsencrypt_email.clone()));
            }
        }

        if self.deploy_mode == DeployMode::Remote {
            match &self.ssh {
                Some(ssh) if !ssh.host.trim().is_empty() => {}
                _ => return Err(ConfigError::MissingSshHost),
            }
        }

        for site in &self.extra_sites {
            if !is_valid_hostname(&site.name) {
                return Err(ConfigError::ExtraSite(
                    site.name.clone(),
                    Box::new(ConfigError::InvalidSiteName(site.name.clone())),
                ));
            }
            if site.admin_password.len() < MIN_PASSWORD_LEN {
                return Err(ConfigError::ExtraSite(
                    site.name.clone(),
                    Box::new(ConfigError::PasswordTooShort {
                        field: "admin_password",
                    }),
                ));
            }
        }

        Ok(())
    }

    /// Default branch for apps without an explicit or detected branch.
    pub fn default_app_branch(&self) -> String {
        frappe_branch(&self.erpnext_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> DeployConfig {
        DeployConfig {
            site_name: "mysite.localhost".to_string(),
            erpnext_version: "v16.7.3".to_string(),
            db_password: "secret-db".to_string(),
            admin_password: "secret-admin".to_string(),
            ..DeployConfig::default()
        }
    }

    #[test]
    fn local_config_validates() {
        assert_eq!(base_config().validate(), Ok(()));
    }

    #[test]
    fn rejects_invalid_site_name() {
        let mut cfg = base_config();
        cfg.site_name = "not a hostname".to_string();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidSiteName(_))
        ));

        cfg.site_name = "single-label".to_string();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidSiteName(_))
        ));
    }

    #[test]
    fn rejects_non_semver_version() {
        let mut cfg = base_config();
        for bad in ["16.7.3", "v16.7", "v16.7.3-beta", "latest"] {
            cfg.erpnext_version = bad.to_string();
            assert!(
                matches!(cfg.validate(), Err(ConfigError::InvalidVersion(_))),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn rejects_versions_below_minimum_major() {
        let mut cfg = base_config();
        cfg.erpnext_version = "v13.2.0".to_string();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn production_requires_domain_and_email() {
        let mut cfg = base_config();
        cfg.deploy_mode = DeployMode::Production;
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingDomain { .. })));

        cfg.domain = "erp.example.com".to_string();
        let err = cfg.validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingLetsencryptEmail {
                mode: DeployMode::Production
            }
        );
        assert!(err.to_string().contains("letsencrypt_email"));

        cfg.letsencrypt_email = "a@b.com".to_string();
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn remote_requires_ssh_host() {
        let mut cfg = base_config();
        cfg.deploy_mode = DeployMode::Remote;
        cfg.domain = "erp.example.com".to_string();
        cfg.letsencrypt_email = "a@b.com".to_string();
        assert_eq!(cfg.validate(), Err(ConfigError::MissingSshHost));

        cfg.ssh = Some(SshAccess {
            host: "192.168.1.100".to_string(),
            user: "root".to_string(),
            port: 22,
            key_path: None,
        });
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn enforces_password_length() {
        let mut cfg = base_config();
        cfg.db_password = "x".to_string();
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::PasswordTooShort { field: "db_password" })
        );
    }

    #[test]
    fn frappe_branch_follows_major_version() {
        assert_eq!(frappe_branch("v16.7.3"), "version-16");
        assert_eq!(frappe_branch("v15.2.0"), "version-15");
        assert_eq!(frappe_branch("garbage"), "version-16");
    }

    #[test]
    fn release_versions_order_numerically() {
        let a = ReleaseVersion::parse("v15.10.2").unwrap();
        let b = ReleaseVersion::parse("v15.9.9").unwrap();
        let c = ReleaseVersion::parse("v16.0.0").unwrap();
        assert!(c > a);
        assert!(a > b);
    }

    #[test]
    fn custom_app_derives_short_name() {
        let app = CustomApp::new("https://github.com/myorg/myapp.git", "main");
        assert_eq!(app.name, "myapp");
        let app = CustomApp::new("https://github.com/myorg/other/", "main");
        assert_eq!(app.name, "other");
    }
}
