use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::OnceLock;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use erpwiz_core_domain::{
    BackupSettings, ConfigError, CustomApp, DbType, DeployConfig, DeployMode, ExtraSite,
    MailSettings, SshAccess, FALLBACK_VERSION, MIN_PASSWORD_LEN, OPTIONAL_APPS,
};
use erpwiz_deploy::{compose, envfile, hosts, image, integrations, prereqs, site, upgrade, DeployError};
use erpwiz_deploy::compose::ComposeProject;
use erpwiz_deploy::hosts::HostsUpdate;
use erpwiz_deploy::site::AppSpec;
use erpwiz_exec::{create_executor, ExecError};
use erpwiz_releases as releases;

#[derive(Parser)]
#[command(name = "erpwiz")]
#[command(about = "ERPNext deployment wizard", long_about = None)]
struct Cli {
    /// Output language: en or tr. Overrides ERPWIZ_LANG.
    #[arg(long, global = true)]
    lang: Option<String>,
    /// Deployment settings file (YAML). Skips the interactive wizard.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(flatten)]
    overrides: DeployArgs,
    #[command(subcommand)]
    command: Option<CliCommand>,
}

/// Flag-based settings. They override the settings file; when the required
/// ones are all present the wizard is skipped entirely.
#[derive(Args, Default)]
struct DeployArgs {
    /// Deployment mode: local, production or remote.
    #[arg(long, global = true)]
    mode: Option<String>,
    #[arg(long, global = true)]
    site_name: Option<String>,
    /// ERPNext release tag, e.g. v16.7.3.
    #[arg(long, global = true)]
    version: Option<String>,
    /// Database engine: mariadb or postgres.
    #[arg(long, global = true)]
    db_type: Option<String>,
    #[arg(long, global = true)]
    http_port: Option<u16>,
    #[arg(long, global = true)]
    domain: Option<String>,
    #[arg(long, global = true)]
    letsencrypt_email: Option<String>,
    #[arg(long, global = true)]
    db_password: Option<String>,
    #[arg(long, global = true)]
    admin_password: Option<String>,
    #[arg(long, global = true)]
    ssh_host: Option<String>,
    #[arg(long, global = true)]
    ssh_user: Option<String>,
    #[arg(long, global = true)]
    ssh_port: Option<u16>,
    #[arg(long, global = true)]
    ssh_key: Option<String>,
}

impl DeployArgs {
    /// Enough to deploy without asking anything.
    fn is_complete(&self) -> bool {
        self.site_name.is_some()
            && self.version.is_some()
            && self.db_password.is_some()
            && self.admin_password.is_some()
    }
}

#[derive(Subcommand)]
enum CliCommand {
    /// Show the state of the deployed stack.
    Status,
    /// Upgrade a deployed stack to a newer release and migrate its sites.
    Upgrade(UpgradeCommand),
    /// Build the custom image without deploying.
    Build,
}

#[derive(Args)]
struct UpgradeCommand {
    /// Target release tag, e.g. v16.8.0. Latest stable when omitted.
    #[arg(long)]
    to: Option<String>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Invalid(#[from] ConfigError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("interrupted")]
    Interrupted,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(CliError::Interrupted) => {
            eprintln!();
            std::process::exit(130);
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32, CliError> {
    let cli = Cli::parse();
    init_language(cli.lang.as_deref());

    let unattended = cli.config.is_some() || cli.overrides.is_complete();
    let mut base = match &cli.config {
        Some(path) => load_config_file(path)?,
        None => DeployConfig::default(),
    };
    apply_overrides(&mut base, &cli.overrides)?;

    match cli.command {
        Some(CliCommand::Status) => status(&base),
        Some(CliCommand::Upgrade(cmd)) => run_upgrade(&base, cmd.to.as_deref()),
        Some(CliCommand::Build) => run_build(base),
        None => {
            if unattended {
                deploy(base, false)
            } else {
                match wizard()? {
                    Some(cfg) => deploy(cfg, true),
                    None => Ok(0),
                }
            }
        }
    }
}

fn apply_overrides(cfg: &mut DeployConfig, args: &DeployArgs) -> Result<(), CliError> {
    if let Some(mode) = &args.mode {
        cfg.deploy_mode = DeployMode::parse(mode)
            .ok_or_else(|| CliError::Config(format!("unknown mode: {mode}")))?;
    }
    if let Some(db) = &args.db_type {
        cfg.db_type = DbType::parse(db)
            .ok_or_else(|| CliError::Config(format!("unknown database engine: {db}")))?;
    }
    if let Some(site_name) = &args.site_name {
        cfg.site_name = site_name.clone();
    }
    if let Some(version) = &args.version {
        cfg.erpnext_version = version.clone();
    }
    if let Some(port) = args.http_port {
        cfg.http_port = port;
    }
    if let Some(domain) = &args.domain {
        cfg.domain = domain.clone();
    }
    if let Some(email) = &args.letsencrypt_email {
        cfg.letsencrypt_email = email.clone();
    }
    if let Some(password) = &args.db_password {
        cfg.db_password = password.clone();
    }
    if let Some(password) = &args.admin_password {
        cfg.admin_password = password.clone();
    }
    if args.ssh_host.is_some()
        || args.ssh_user.is_some()
        || args.ssh_port.is_some()
        || args.ssh_key.is_some()
    {
        let mut ssh = cfg.ssh.take().unwrap_or(SshAccess {
            host: String::new(),
            user: "root".to_string(),
            port: 22,
            key_path: None,
        });
        if let Some(host) = &args.ssh_host {
            ssh.host = host.clone();
        }
        if let Some(user) = &args.ssh_user {
            ssh.user = user.clone();
        }
        if let Some(port) = args.ssh_port {
            ssh.port = port;
        }
        if let Some(key) = &args.ssh_key {
            ssh.key_path = Some(key.clone());
        }
        cfg.ssh = Some(ssh);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Language

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    En,
    Tr,
}

static LANGUAGE: OnceLock<Language> = OnceLock::new();

fn init_language(flag: Option<&str>) {
    let lang = flag
        .map(str::to_string)
        .or_else(|| std::env::var("ERPWIZ_LANG").ok())
        .or_else(|| std::env::var("LANG").ok())
        .unwrap_or_default()
        .to_lowercase();
    let language = if lang.starts_with("tr") {
        Language::Tr
    } else {
        Language::En
    };
    let _ = LANGUAGE.set(language);
}

fn language() -> Language {
    *LANGUAGE.get().unwrap_or(&Language::En)
}

fn t(key: &'static str) -> &'static str {
    match language() {
        Language::Tr => match key {
            "mode_title" => "Kurulum türü",
            "mode_local" => "Yerel (bu makine, sadece deneme)",
            "mode_production" => "Üretim (bu makine, HTTPS)",
            "mode_remote" => "Uzak sunucu (SSH üzerinden)",
            "choose" => "Seçiminiz",
            "invalid_choice" => "Geçersiz seçim",
            "ssh_host" => "Sunucu adresi",
            "ssh_user" => "SSH kullanıcısı",
            "ssh_port" => "SSH portu",
            "ssh_key" => "SSH anahtar dosyası (boş bırakılabilir)",
            "domain_prompt" => "Alan adı (örn. erp.sirket.com)",
            "email_prompt" => "Let's Encrypt e-posta adresi",
            "site_prompt" => "Site adı",
            "version_title" => "ERPNext sürümü",
            "version_fetch_failed" => "Sürüm listesi alınamadı, sürümü elle girin.",
            "version_prompt" => "Sürüm etiketi",
            "db_title" => "Veritabanı",
            "port_prompt" => "HTTP portu",
            "db_password_prompt" => "Veritabanı root parolası",
            "admin_password_prompt" => "Yönetici parolası",
            "password_short" => "Parola çok kısa (en az 6 karakter)",
            "apps_title" => "Ek uygulamalar",
            "apps_prompt" => "Kurulacak uygulamalar (virgülle ayrılmış numaralar, boş = hiçbiri)",
            "community_prompt" => "Topluluk uygulamalarına göz atılsın mı?",
            "community_fetch" => "Topluluk uygulama listesi indiriliyor...",
            "community_none" => "Topluluk uygulaması bulunamadı.",
            "custom_prompt" => "Özel uygulama eklensin mi? (git deposu)",
            "custom_url" => "Depo adresi",
            "custom_branch" => "Dal (boş = otomatik seç)",
            "custom_more" => "Başka özel uygulama eklensin mi?",
            "portainer_prompt" => "Portainer kurulsun mu?",
            "backup_cron_prompt" => "Zamanlanmış yedekleme kurulsun mu?",
            "build_image_prompt" => "Özel imaj derlensin mi?",
            "image_tag_prompt" => "İmaj etiketi",
            "extra_site_prompt" => "Ek site eklensin mi?",
            "extra_site_name" => "Ek site adı",
            "extra_site_more" => "Başka site eklensin mi?",
            "mail_prompt" => "E-posta (SMTP) ayarlansın mı?",
            "mail_host" => "SMTP sunucusu",
            "mail_port" => "SMTP portu",
            "mail_user" => "SMTP kullanıcısı",
            "mail_pass" => "SMTP parolası",
            "mail_tls" => "TLS kullanılsın mı?",
            "backup_prompt" => "S3 yedekleme hedefi ayarlansın mı?",
            "s3_endpoint" => "S3 adresi",
            "s3_bucket" => "S3 kovası",
            "s3_access" => "S3 erişim anahtarı",
            "s3_secret" => "S3 gizli anahtarı",
            "summary_title" => "Özet",
            "confirm_deploy" => "Kuruluma başlansın mı?",
            "cancelled" => "Kurulum iptal edildi.",
            "checking_prereqs" => "Önkoşullar denetleniyor",
            "resolving_branches" => "Uygulama dalları çözülüyor",
            "building_image" => "Özel imaj derleniyor",
            "writing_env" => "Yapılandırma dosyası yazılıyor",
            "starting_stack" => "Konteynerler başlatılıyor",
            "stack_confirmed" => "Tüm servisler çalışıyor.",
            "stack_unconfirmed" => "Servis durumu doğrulanamadı, devam ediliyor.",
            "creating_site" => "Site oluşturuluyor",
            "retry_site" => "Site oluşturma başarısız. Yeniden denensin mi?",
            "scheduler_warn" => "Uyarı: zamanlayıcı etkinleştirilemedi.",
            "installing_apps" => "Uygulamalar kuruluyor",
            "apps_official" => "Resmi uygulamalar",
            "apps_community" => "Topluluk uygulamaları",
            "apps_custom" => "Özel uygulamalar",
            "installed" => "kuruldu",
            "failed" => "başarısız",
            "restarting_frontend" => "Ön yüz yeniden başlatılıyor",
            "extra_sites_step" => "Ek siteler oluşturuluyor",
            "mail_step" => "E-posta ayarları uygulanıyor",
            "mail_warn" => "Uyarı: bazı e-posta ayarları uygulanamadı.",
            "backup_step" => "Yedekleme ayarları uygulanıyor",
            "backup_warn" => "Uyarı: bazı yedekleme ayarları uygulanamadı.",
            "doctor_warn" => "Uyarı: bench doctor sorun bildirdi.",
            "hosts_added" => "Hosts dosyasına kayıt eklendi.",
            "hosts_present" => "Hosts kaydı zaten mevcut.",
            "hosts_manual" => "Hosts dosyası yazılamadı. Şu satırı elle ekleyin:",
            "done" => "Kurulum tamamlandı.",
            "done_url" => "Adres",
            "upgrade_current" => "Kurulu sürüm",
            "upgrade_target" => "Hedef sürüm",
            "upgrade_uptodate" => "Sistem zaten güncel.",
            "upgrade_env_warn" => "Uyarı: sürüm dosyası güncellenemedi.",
            "pull_warn" => "Uyarı: güncel imajlar indirilemedi, eldekiler kullanılacak.",
            "upgrade_backup" => "Siteler yedekleniyor",
            "upgrade_backup_failed" => "Yedekleme başarısız, yükseltme durduruldu.",
            "upgrade_migrate" => "Siteler taşınıyor",
            "migrate_warn" => "Uyarı: bazı siteler taşınamadı.",
            "upgrade_done" => "Yükseltme tamamlandı.",
            _ => key,
        },
        Language::En => match key {
            "mode_title" => "Deployment type",
            "mode_local" => "Local (this machine, evaluation only)",
            "mode_production" => "Production (this machine, HTTPS)",
            "mode_remote" => "Remote server (over SSH)",
            "choose" => "Choice",
            "invalid_choice" => "Invalid choice",
            "ssh_host" => "Server address",
            "ssh_user" => "SSH user",
            "ssh_port" => "SSH port",
            "ssh_key" => "SSH key file (optional)",
            "domain_prompt" => "Domain name (e.g. erp.example.com)",
            "email_prompt" => "Let's Encrypt email address",
            "site_prompt" => "Site name",
            "version_title" => "ERPNext version",
            "version_fetch_failed" => "Could not fetch the release list, enter a version manually.",
            "version_prompt" => "Release tag",
            "db_title" => "Database",
            "port_prompt" => "HTTP port",
            "db_password_prompt" => "Database root password",
            "admin_password_prompt" => "Administrator password",
            "password_short" => "Password too short (minimum 6 characters)",
            "apps_title" => "Additional apps",
            "apps_prompt" => "Apps to install (comma-separated numbers, empty = none)",
            "community_prompt" => "Browse community apps?",
            "community_fetch" => "Fetching the community app index...",
            "community_none" => "No community apps found.",
            "custom_prompt" => "Add a custom app? (git repository)",
            "custom_url" => "Repository URL",
            "custom_branch" => "Branch (empty = auto-detect)",
            "custom_more" => "Add another custom app?",
            "portainer_prompt" => "Install Portainer?",
            "backup_cron_prompt" => "Install scheduled backups?",
            "build_image_prompt" => "Build a custom image?",
            "image_tag_prompt" => "Image tag",
            "extra_site_prompt" => "Add an extra site?",
            "extra_site_name" => "Extra site name",
            "extra_site_more" => "Add another site?",
            "mail_prompt" => "Configure outgoing mail (SMTP)?",
            "mail_host" => "SMTP server",
            "mail_port" => "SMTP port",
            "mail_user" => "SMTP user",
            "mail_pass" => "SMTP password",
            "mail_tls" => "Use TLS?",
            "backup_prompt" => "Configure an S3 backup target?",
            "s3_endpoint" => "S3 endpoint",
            "s3_bucket" => "S3 bucket",
            "s3_access" => "S3 access key",
            "s3_secret" => "S3 secret key",
            "summary_title" => "Summary",
            "confirm_deploy" => "Start the deployment?",
            "cancelled" => "Deployment cancelled.",
            "checking_prereqs" => "Checking prerequisites",
            "resolving_branches" => "Resolving app branches",
            "building_image" => "Building the custom image",
            "writing_env" => "Writing the configuration file",
            "starting_stack" => "Starting containers",
            "stack_confirmed" => "All services are running.",
            "stack_unconfirmed" => "Could not confirm service health, proceeding anyway.",
            "creating_site" => "Creating the site",
            "retry_site" => "Site creation failed. Try again?",
            "scheduler_warn" => "Warning: could not enable the scheduler.",
            "installing_apps" => "Installing apps",
            "apps_official" => "Official apps",
            "apps_community" => "Community apps",
            "apps_custom" => "Custom apps",
            "installed" => "installed",
            "failed" => "failed",
            "restarting_frontend" => "Restarting the frontend",
            "extra_sites_step" => "Creating extra sites",
            "mail_step" => "Applying mail settings",
            "mail_warn" => "Warning: some mail settings could not be applied.",
            "backup_step" => "Applying backup settings",
            "backup_warn" => "Warning: some backup settings could not be applied.",
            "doctor_warn" => "Warning: bench doctor reported problems.",
            "hosts_added" => "Added a hosts file entry.",
            "hosts_present" => "Hosts entry already present.",
            "hosts_manual" => "Could not write the hosts file. Add this line manually:",
            "done" => "Deployment finished.",
            "done_url" => "Address",
            "upgrade_current" => "Deployed version",
            "upgrade_target" => "Target version",
            "upgrade_uptodate" => "Already up to date.",
            "upgrade_env_warn" => "Warning: could not update the version file.",
            "pull_warn" => "Warning: could not pull updated images, using what is cached.",
            "upgrade_backup" => "Backing up sites",
            "upgrade_backup_failed" => "Backup failed, upgrade stopped.",
            "upgrade_migrate" => "Migrating sites",
            "migrate_warn" => "Warning: some sites failed to migrate.",
            "upgrade_done" => "Upgrade finished.",
            _ => key,
        },
    }
}

// ---------------------------------------------------------------------------
// Prompt helpers

fn prompt_line(label: &str) -> Result<String, CliError> {
    let mut input = String::new();
    print!("{label}: ");
    io::stdout().flush()?;
    if io::stdin().read_line(&mut input)? == 0 {
        return Err(CliError::Interrupted);
    }
    Ok(input.trim().to_string())
}

fn prompt_default(label: &str, default: &str) -> Result<String, CliError> {
    let mut input = String::new();
    print!("{label} [{default}]: ");
    io::stdout().flush()?;
    if io::stdin().read_line(&mut input)? == 0 {
        return Err(CliError::Interrupted);
    }
    let value = input.trim();
    if value.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(value.to_string())
    }
}

fn prompt_yes_no(label: &str, default_yes: bool) -> Result<bool, CliError> {
    let hint = if default_yes { "Y/n" } else { "y/N" };
    let mut input = String::new();
    print!("{label} [{hint}]: ");
    io::stdout().flush()?;
    if io::stdin().read_line(&mut input)? == 0 {
        return Err(CliError::Interrupted);
    }
    let value = input.trim().to_lowercase();
    if value.is_empty() {
        return Ok(default_yes);
    }
    // Turkish yes is "evet".
    Ok(matches!(value.as_str(), "y" | "yes" | "e" | "evet"))
}

fn prompt_password(label: &str) -> Result<String, CliError> {
    loop {
        let password = rpassword::prompt_password(format!("{label}: "))?;
        if password.len() >= MIN_PASSWORD_LEN {
            return Ok(password);
        }
        println!("{}", t("password_short"));
    }
}

/// Numbered single choice; empty input picks the first item.
fn prompt_select(title: &str, items: &[String]) -> Result<usize, CliError> {
    println!("{title}:");
    for (i, item) in items.iter().enumerate() {
        println!("  {}) {item}", i + 1);
    }
    loop {
        let value = prompt_default(t("choose"), "1")?;
        match value.parse::<usize>() {
            Ok(n) if n >= 1 && n <= items.len() => return Ok(n - 1),
            _ => println!("{}", t("invalid_choice")),
        }
    }
}

/// Numbered multi-choice; empty input selects nothing.
fn prompt_multi_select(title: &str, items: &[String]) -> Result<Vec<usize>, CliError> {
    println!("{title}:");
    for (i, item) in items.iter().enumerate() {
        println!("  {}) {item}", i + 1);
    }
    loop {
        let value = prompt_line(t("apps_prompt"))?;
        if value.is_empty() {
            return Ok(Vec::new());
        }
        let parsed: Option<Vec<usize>> = value
            .split(',')
            .map(|part| match part.trim().parse::<usize>() {
                Ok(n) if n >= 1 && n <= items.len() => Some(n - 1),
                _ => None,
            })
            .collect();
        match parsed {
            Some(mut indexes) => {
                indexes.sort_unstable();
                indexes.dedup();
                return Ok(indexes);
            }
            None => println!("{}", t("invalid_choice")),
        }
    }
}

fn step(label: &str) {
    println!();
    println!("==> {label}");
}

// ---------------------------------------------------------------------------
// Configuration sources

fn load_config_file(path: &PathBuf) -> Result<DeployConfig, CliError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| CliError::Config(format!("cannot read {}: {err}", path.display())))?;
    let cfg: DeployConfig = serde_yaml::from_str(&content)
        .map_err(|err| CliError::Config(format!("invalid settings in {}: {err}", path.display())))?;
    Ok(cfg)
}

fn wizard() -> Result<Option<DeployConfig>, CliError> {
    println!("erpwiz - ERPNext deployment wizard");

    let mut cfg = DeployConfig::default();

    let modes = vec![
        t("mode_local").to_string(),
        t("mode_production").to_string(),
        t("mode_remote").to_string(),
    ];
    cfg.deploy_mode = match prompt_select(t("mode_title"), &modes)? {
        0 => DeployMode::Local,
        1 => DeployMode::Production,
        _ => DeployMode::Remote,
    };

    if cfg.deploy_mode == DeployMode::Remote {
        let host = prompt_line(t("ssh_host"))?;
        let user = prompt_default(t("ssh_user"), "root")?;
        let port = prompt_default(t("ssh_port"), "22")?
            .parse::<u16>()
            .unwrap_or(22);
        let key = prompt_line(t("ssh_key"))?;
        cfg.ssh = Some(SshAccess {
            host,
            user,
            port,
            key_path: if key.is_empty() { None } else { Some(key) },
        });
    }

    if cfg.deploy_mode.needs_domain() {
        cfg.domain = prompt_line(t("domain_prompt"))?;
        cfg.letsencrypt_email = prompt_line(t("email_prompt"))?;
        let default_site = cfg.domain.clone();
        cfg.site_name = prompt_default(t("site_prompt"), &default_site)?;
    } else {
        cfg.site_name = prompt_default(t("site_prompt"), "mysite.localhost")?;
    }

    cfg.erpnext_version = choose_version()?;

    let databases = vec!["MariaDB".to_string(), "PostgreSQL".to_string()];
    cfg.db_type = match prompt_select(t("db_title"), &databases)? {
        1 => DbType::Postgres,
        _ => DbType::Mariadb,
    };

    if cfg.deploy_mode == DeployMode::Local {
        cfg.http_port = prompt_default(t("port_prompt"), "8080")?
            .parse::<u16>()
            .unwrap_or(8080);
    }

    cfg.db_password = prompt_password(t("db_password_prompt"))?;
    cfg.admin_password = prompt_password(t("admin_password_prompt"))?;

    let app_labels: Vec<String> = OPTIONAL_APPS
        .iter()
        .map(|(_, display)| display.to_string())
        .collect();
    for index in prompt_multi_select(t("apps_title"), &app_labels)? {
        cfg.extra_apps.push(OPTIONAL_APPS[index].0.to_string());
    }

    if prompt_yes_no(t("community_prompt"), false)? {
        println!("{}", t("community_fetch"));
        let available = releases::fetch_community_apps(&cfg.erpnext_version);
        if available.is_empty() {
            println!("{}", t("community_none"));
        } else {
            let labels: Vec<String> = available
                .iter()
                .map(|app| format!("{} ({})", app.display_name, app.repo_url))
                .collect();
            for index in prompt_multi_select(t("apps_title"), &labels)? {
                cfg.community_apps.push(available[index].clone());
            }
        }
    }

    if prompt_yes_no(t("custom_prompt"), false)? {
        loop {
            let url = prompt_line(t("custom_url"))?;
            if !url.is_empty() {
                let branch = prompt_line(t("custom_branch"))?;
                let branch = if branch.is_empty() {
                    releases::detect_best_branch(&url, &cfg.erpnext_version)
                        .unwrap_or_else(|| cfg.default_app_branch())
                } else {
                    branch
                };
                cfg.custom_apps.push(CustomApp::new(&url, &branch));
            }
            if !prompt_yes_no(t("custom_more"), false)? {
                break;
            }
        }
    }

    cfg.enable_portainer = prompt_yes_no(t("portainer_prompt"), false)?;
    cfg.backup_cron = prompt_yes_no(t("backup_cron_prompt"), false)?;
    cfg.build_image = prompt_yes_no(t("build_image_prompt"), false)?;
    if cfg.build_image {
        cfg.image_tag = Some(prompt_default(t("image_tag_prompt"), image::DEFAULT_IMAGE_TAG)?);
    }

    if prompt_yes_no(t("extra_site_prompt"), false)? {
        loop {
            let name = prompt_line(t("extra_site_name"))?;
            if !name.is_empty() {
                let admin_password = prompt_password(t("admin_password_prompt"))?;
                cfg.extra_sites.push(ExtraSite {
                    name,
                    admin_password,
                });
            }
            if !prompt_yes_no(t("extra_site_more"), false)? {
                break;
            }
        }
    }

    if prompt_yes_no(t("mail_prompt"), false)? {
        cfg.mail = Some(MailSettings {
            host: prompt_line(t("mail_host"))?,
            port: prompt_default(t("mail_port"), "587")?.parse().unwrap_or(587),
            user: prompt_line(t("mail_user"))?,
            password: rpassword::prompt_password(format!("{}: ", t("mail_pass")))?,
            use_tls: prompt_yes_no(t("mail_tls"), true)?,
        });
    }

    if prompt_yes_no(t("backup_prompt"), false)? {
        cfg.backup = Some(BackupSettings {
            s3_endpoint: prompt_line(t("s3_endpoint"))?,
            s3_bucket: prompt_line(t("s3_bucket"))?,
            s3_access_key: prompt_line(t("s3_access"))?,
            s3_secret_key: rpassword::prompt_password(format!("{}: ", t("s3_secret")))?,
        });
    }

    print_summary(&cfg);
    if !prompt_yes_no(t("confirm_deploy"), true)? {
        println!("{}", t("cancelled"));
        return Ok(None);
    }

    Ok(Some(cfg))
}

fn choose_version() -> Result<String, CliError> {
    let versions = releases::fetch_versions();
    if versions.is_empty() {
        println!("{}", t("version_fetch_failed"));
        return prompt_default(t("version_prompt"), FALLBACK_VERSION);
    }
    let shown: Vec<String> = versions.iter().take(10).cloned().collect();
    let index = prompt_select(t("version_title"), &shown)?;
    Ok(shown[index].clone())
}

fn print_summary(cfg: &DeployConfig) {
    println!();
    println!("{}:", t("summary_title"));
    println!("  {}: {}", t("mode_title"), cfg.deploy_mode);
    println!("  {}: {}", t("site_prompt"), cfg.site_name);
    println!("  {}: {}", t("version_title"), cfg.erpnext_version);
    println!("  {}: {}", t("db_title"), cfg.db_type);
    if cfg.deploy_mode.needs_domain() {
        println!("  {}: {}", t("domain_prompt"), cfg.domain);
    } else {
        println!("  {}: {}", t("port_prompt"), cfg.http_port);
    }
    if let Some(ssh) = &cfg.ssh {
        println!("  SSH: {}@{}:{}", ssh.user, ssh.host, ssh.port);
    }
    let app_count = cfg.extra_apps.len() + cfg.community_apps.len() + cfg.custom_apps.len();
    println!("  {}: {}", t("apps_title"), app_count);
}

// ---------------------------------------------------------------------------
// Deployment pipeline

fn deploy(mut cfg: DeployConfig, interactive: bool) -> Result<i32, CliError> {
    cfg.validate()?;

    let exec = create_executor(&cfg)?;

    step(t("checking_prereqs"));
    let found = prereqs::verify(&cfg, exec.as_ref())?;
    println!("  {}", found.docker_version);
    println!("  {}", found.compose_version);

    step(t("resolving_branches"));
    resolve_app_branches(&mut cfg);

    let project = ComposeProject::from_config(&cfg);

    if cfg.build_image {
        step(t("building_image"));
        image::build_image(&cfg, exec.as_ref(), &project)?;
    }

    if cfg.enable_portainer {
        compose::write_portainer_overlay(exec.as_ref(), &cfg)?;
    }

    step(t("writing_env"));
    envfile::install_env(&cfg, exec.as_ref())?;

    step(t("starting_stack"));
    let confirmed = compose::apply(
        exec.as_ref(),
        &project,
        &compose::HealthPoll::default(),
        compose::fallback_duration(cfg.deploy_mode),
    )?;
    if confirmed {
        println!("{}", t("stack_confirmed"));
    } else {
        println!("{}", t("stack_unconfirmed"));
    }

    step(t("creating_site"));
    let mut confirm_retry = || {
        if !interactive {
            return false;
        }
        prompt_yes_no(t("retry_site"), false).unwrap_or(false)
    };
    site::create_site(
        exec.as_ref(),
        &project,
        &cfg.site_name,
        &cfg,
        &cfg.admin_password,
        &mut confirm_retry,
    )?;
    if !site::enable_scheduler(exec.as_ref(), &project, &cfg.site_name)? {
        println!("{}", t("scheduler_warn"));
    }

    let categories = planned_app_categories(&cfg);
    let mut installed_apps: Vec<String> = Vec::new();
    if categories.iter().any(|(_, apps)| !apps.is_empty()) {
        step(t("installing_apps"));
        for (label, apps) in &categories {
            if apps.is_empty() {
                continue;
            }
            let mut succeeded = 0;
            for app in apps {
                let ok = site::install_app(exec.as_ref(), &project, &cfg.site_name, app)?;
                if ok {
                    println!("  {}: {}", app.name, t("installed"));
                    succeeded += 1;
                    installed_apps.push(app.name.clone());
                } else {
                    println!("  {}: {}", app.name, t("failed"));
                }
            }
            println!("  {}: {succeeded}/{}", t(*label), apps.len());
        }
        if !installed_apps.is_empty() {
            step(t("restarting_frontend"));
            site::restart_frontend(exec.as_ref(), &project)?;
        }
    }

    if !cfg.extra_sites.is_empty() {
        step(t("extra_sites_step"));
        for extra in &cfg.extra_sites {
            let created = site::create_site_fail_soft(
                exec.as_ref(),
                &project,
                &extra.name,
                &cfg,
                &extra.admin_password,
                &mut confirm_retry,
            )?;
            if !created {
                println!("  {}: {}", extra.name, t("failed"));
                continue;
            }
            if !site::enable_scheduler(exec.as_ref(), &project, &extra.name)? {
                println!("{}", t("scheduler_warn"));
            }
            for app_name in &installed_apps {
                let ok =
                    site::install_app_on_site(exec.as_ref(), &project, &extra.name, app_name)?;
                let label = if ok { t("installed") } else { t("failed") };
                println!("  {}/{}: {}", extra.name, app_name, label);
            }
        }
    }

    if let Some(mail) = &cfg.mail {
        step(t("mail_step"));
        if !integrations::configure_mail(exec.as_ref(), &project, &cfg.site_name, mail)? {
            println!("{}", t("mail_warn"));
        }
    }
    if let Some(backup) = &cfg.backup {
        step(t("backup_step"));
        if !integrations::configure_backup(exec.as_ref(), &project, &cfg.site_name, backup)? {
            println!("{}", t("backup_warn"));
        }
    }

    if !site::doctor(exec.as_ref(), &project, &cfg.site_name)? {
        println!("{}", t("doctor_warn"));
    }

    if cfg.deploy_mode == DeployMode::Local {
        register_hosts_entry(&cfg.site_name)?;
    }

    println!();
    println!("{}", t("done"));
    let url = if cfg.deploy_mode.needs_domain() {
        format!("https://{}", cfg.domain)
    } else {
        format!("http://{}:{}", cfg.site_name, cfg.http_port)
    };
    println!("{}: {url}", t("done_url"));
    Ok(0)
}

/// Resolve a branch for every official extra app that has no explicit
/// override: a version-matching branch when the repository has one, the
/// default framework branch otherwise.
fn resolve_app_branches(cfg: &mut DeployConfig) {
    let default_branch = cfg.default_app_branch();
    for name in cfg.extra_apps.clone() {
        if cfg.app_branches.contains_key(&name) {
            continue;
        }
        let url = format!("https://github.com/frappe/{name}");
        let branch = releases::detect_best_branch(&url, &cfg.erpnext_version)
            .unwrap_or_else(|| default_branch.clone());
        cfg.app_branches.insert(name, branch);
    }
}

fn planned_app_categories(cfg: &DeployConfig) -> [(&'static str, Vec<AppSpec>); 3] {
    let official = cfg
        .extra_apps
        .iter()
        .map(|name| AppSpec::official(name, cfg.app_branches.get(name).cloned()))
        .collect();
    let community = cfg
        .community_apps
        .iter()
        .map(|app| AppSpec::from_repo(&app.repo_name, &app.repo_url, &app.branch))
        .collect();
    let custom = cfg
        .custom_apps
        .iter()
        .map(|app| AppSpec::from_repo(&app.name, &app.url, &app.branch))
        .collect();
    [
        ("apps_official", official),
        ("apps_community", community),
        ("apps_custom", custom),
    ]
}

fn register_hosts_entry(site_name: &str) -> Result<(), CliError> {
    match hosts::register_site(&hosts::hosts_file_path(), site_name)? {
        HostsUpdate::Added => println!("{}", t("hosts_added")),
        HostsUpdate::AlreadyPresent => println!("{}", t("hosts_present")),
        HostsUpdate::PermissionDenied { line, .. } => {
            println!("{}", t("hosts_manual"));
            println!("  {line}");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Maintenance commands

fn status(cfg: &DeployConfig) -> Result<i32, CliError> {
    let exec = create_executor(cfg)?;
    prereqs::enter_checkout(cfg, exec.as_ref())?;
    let project = ComposeProject::from_config(cfg);
    if let Some(version) = upgrade::deployed_version(exec.as_ref(), &project)? {
        println!("{}: {version}", t("upgrade_current"));
    }
    let code = exec.run(&project.compose("ps"))?;
    Ok(if code == 0 { 0 } else { 1 })
}

fn run_upgrade(cfg: &DeployConfig, version: Option<&str>) -> Result<i32, CliError> {
    let exec = create_executor(cfg)?;
    prereqs::enter_checkout(cfg, exec.as_ref())?;
    let project = ComposeProject::from_config(cfg);

    let deployed = upgrade::deployed_version(exec.as_ref(), &project)?;
    if let Some(deployed) = &deployed {
        println!("{}: {deployed}", t("upgrade_current"));
    }
    let target = match version {
        Some(version) => version.to_string(),
        None => releases::fetch_versions()
            .into_iter()
            .next()
            .unwrap_or_else(|| FALLBACK_VERSION.to_string()),
    };
    println!("{}: {target}", t("upgrade_target"));
    if deployed.as_deref() == Some(target.as_str()) {
        println!("{}", t("upgrade_uptodate"));
        return Ok(0);
    }

    step(t("upgrade_backup"));
    if !upgrade::backup_all_sites(exec.as_ref(), &project)? {
        eprintln!("{}", t("upgrade_backup_failed"));
        return Ok(1);
    }

    if !upgrade::set_versions(exec.as_ref(), &project, &target)? {
        println!("{}", t("upgrade_env_warn"));
    }

    step(t("starting_stack"));
    if !upgrade::pull_images(exec.as_ref(), &project)? {
        println!("{}", t("pull_warn"));
    }
    if exec.run(&project.compose("up -d"))? != 0 {
        return Err(CliError::Deploy(DeployError::ComposeUpFailed));
    }

    step(t("upgrade_migrate"));
    if !upgrade::migrate_all_sites(exec.as_ref(), &project)? {
        println!("{}", t("migrate_warn"));
        return Ok(1);
    }
    println!("{}", t("upgrade_done"));
    Ok(0)
}

fn run_build(mut cfg: DeployConfig) -> Result<i32, CliError> {
    cfg.validate()?;
    let exec = create_executor(&cfg)?;

    step(t("checking_prereqs"));
    prereqs::verify(&cfg, exec.as_ref())?;

    let project = ComposeProject::from_config(&cfg);
    resolve_app_branches(&mut cfg);
    step(t("building_image"));
    image::build_image(&cfg, exec.as_ref(), &project)?;
    Ok(0)
}
