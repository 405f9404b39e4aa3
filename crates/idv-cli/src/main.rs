//! idv: idvault command-line interface
//!
//! Commands:
//!   status                  - vault state, proxy reachability, active identities
//!   config show             - display current configuration
//!   list                    - unlock the vault and list stored identities
//!   enroll <jwt-file>       - enroll a token with the proxy, store the identity
//!   import <identity-file>  - store an already-enrolled identity file
//!   remove <id>             - delete an identity from the vault
//!   login <id>...           - activate identities on the proxy
//!   logout                  - deactivate everything, forget the password
//!   active                  - identities the proxy reports as active
//!   deactivate <id>         - deactivate one identity on the proxy
//!
//! The vault password is read from `IDV_PASSWORD` when set, otherwise
//! prompted for on the terminal.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use idv_core::config::{default_config_path, IdvConfig};
use idv_core::{StateTag, VaultError};
use idv_proxy::ProxyHealth;
use idv_session::{EnrollmentRequest, UploadRequest, VaultService};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tracing::debug;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "idv",
    version,
    about = "idvault identity vault client",
    long_about = "idv: keep proxy identities in an encrypted vault and activate them on demand"
)]
struct Cli {
    /// Path to config.toml (default: $XDG_CONFIG_HOME/idvault/config.toml)
    #[arg(long, short = 'c', env = "IDV_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "IDV_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "IDV_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show vault state, proxy reachability and active identities
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Unlock the vault and list stored identities
    List,

    /// Enroll a JWT with the proxy and store the resulting identity
    Enroll {
        /// Enrollment token file (.jwt)
        jwt_file: PathBuf,
        /// Display name (default: derived from the credential or file name)
        #[arg(long, short = 'n')]
        name: Option<String>,
    },

    /// Store an identity file (JSON, or base64 of JSON)
    Import {
        identity_file: PathBuf,
        #[arg(long, short = 'n')]
        name: Option<String>,
    },

    /// Remove an identity from the vault
    Remove {
        /// Exact id_string, as shown by `idv list`
        id: String,
    },

    /// Activate identities on the proxy
    Login {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Deactivate every identity on the proxy
    Logout,

    /// Show identities the proxy reports as active
    Active,

    /// Deactivate one identity on the proxy
    Deactivate { id: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = load_config(&config_path)?;

    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(cli.log.as_deref().unwrap_or(&config.log.level), &format);
    debug!(config = %config_path.display(), vault = %config.vault.path.display(), "idv starting");

    if let Commands::Config {
        action: ConfigAction::Show,
    } = cli.command
    {
        return cmd_config_show(&config, &config_path);
    }

    let service = VaultService::from_config(&config).context("building vault service")?;

    let result = match cli.command {
        Commands::Status => cmd_status(&service).await,
        Commands::Config { .. } => Ok(()),
        Commands::List => cmd_list(&service).await,
        Commands::Enroll { jwt_file, name } => cmd_enroll(&service, &jwt_file, name).await,
        Commands::Import {
            identity_file,
            name,
        } => cmd_import(&service, &identity_file, name).await,
        Commands::Remove { id } => cmd_remove(&service, &id).await,
        Commands::Login { ids } => cmd_login(&service, &ids).await,
        Commands::Logout => cmd_logout(&service).await,
        Commands::Active => cmd_active(&service).await,
        Commands::Deactivate { id } => cmd_deactivate(&service, &id).await,
    };

    if let Err(e) = &result {
        if let Some(VaultError::Proxy(idv_core::ProxyError::ConnectionRefused(_))) =
            e.downcast_ref::<VaultError>()
        {
            eprintln!("proxy: not running at {}", config.proxy.api_url);
            eprintln!("       Start the proxy, or set [proxy] api_url in the config.");
        }
    }
    result
}

fn load_config(path: &Path) -> Result<IdvConfig> {
    IdvConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout is for command output
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Password input ────────────────────────────────────────────────────────────

/// `IDV_PASSWORD`, or a terminal prompt. With `confirm`, a prompted
/// password is asked for twice.
fn read_password(prompt: &str, confirm: bool) -> Result<SecretString> {
    if let Ok(pw) = std::env::var("IDV_PASSWORD") {
        return Ok(SecretString::from(pw));
    }

    let first = rpassword::prompt_password(prompt).context("reading password")?;
    if confirm {
        let second = rpassword::prompt_password("Repeat password: ").context("reading password")?;
        if first != second {
            anyhow::bail!("passwords do not match");
        }
    }
    Ok(SecretString::from(first))
}

/// Unlock with a prompted password; the vault must exist.
async fn unlock(service: &VaultService) -> Result<()> {
    if !service.check_vault_exists() {
        anyhow::bail!(
            "no vault yet: add an identity with `idv enroll` or `idv import` first"
        );
    }
    let password = read_password("Vault password: ", false)?;
    service.unlock_vault(password).await?;
    Ok(())
}

/// Password for a write: new vaults get a confirmed password.
fn write_password(service: &VaultService) -> Result<SecretString> {
    if service.check_vault_exists() {
        read_password("Vault password: ", false)
    } else {
        read_password("New vault password: ", true)
    }
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

// ── `idv status` ──────────────────────────────────────────────────────────────

async fn cmd_status(service: &VaultService) -> Result<()> {
    // only unlock non-interactively; status never prompts
    if service.check_vault_exists() {
        if let Ok(pw) = std::env::var("IDV_PASSWORD") {
            if let Err(e) = service.unlock_vault(SecretString::from(pw)).await {
                println!("  unlock:        failed ({e})");
            }
        }
    }
    let state = service.session().determine_initial_state().await;

    println!("idv v{}", env!("CARGO_PKG_VERSION"));
    println!("  vault:         {}", service.session().store().path().display());
    println!("  state:         {}", state.tag);
    if let Some(err) = &state.error {
        println!("  note:          {err}");
    }
    if matches!(state.tag, StateTag::UnlockedEmpty | StateTag::UnlockedListed) {
        let identities = service.get_vault_identities().await?;
        println!("  identities:    {}", identities.len());
    }

    let health = service.proxy_health().await;
    println!("  proxy:         {health}");
    if let ProxyHealth::Up = health {
        let active = service.active_identities().await?;
        println!("  active:        {}", active.len());
        for identity in active {
            println!("    - {}", identity.identity_id);
        }
    }
    Ok(())
}

// ── `idv config show` ─────────────────────────────────────────────────────────

fn cmd_config_show(config: &IdvConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!("# proxy rules: {}", config.proxy.proxy_rules());
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── `idv list` ────────────────────────────────────────────────────────────────

async fn cmd_list(service: &VaultService) -> Result<()> {
    unlock(service).await?;
    let identities = service.get_vault_identities().await?;

    if identities.is_empty() {
        println!("vault is empty");
        return Ok(());
    }
    println!("{:<32} {:<32} ADDED", "ID", "NAME");
    for record in identities {
        println!("{:<32} {:<32} {}", record.id_string, record.name, record.added_at);
    }
    Ok(())
}

// ── `idv enroll` / `idv import` ───────────────────────────────────────────────

async fn cmd_enroll(service: &VaultService, jwt_file: &Path, name: Option<String>) -> Result<()> {
    let jwt_content = tokio::fs::read_to_string(jwt_file)
        .await
        .with_context(|| format!("reading token: {}", jwt_file.display()))?;
    let password = write_password(service)?;

    let record = service
        .handle_enrollment(EnrollmentRequest {
            jwt_content,
            file_name: file_name_of(jwt_file),
            name,
            password,
        })
        .await?;
    println!("enrolled: {} ({})", record.id_string, record.name);
    Ok(())
}

async fn cmd_import(service: &VaultService, file: &Path, name: Option<String>) -> Result<()> {
    let identity_file = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading identity file: {}", file.display()))?;
    let password = write_password(service)?;

    let record = service
        .handle_identity_upload(UploadRequest {
            identity_file,
            file_name: file_name_of(file),
            name,
            password,
        })
        .await?;
    println!("imported: {} ({})", record.id_string, record.name);
    Ok(())
}

// ── `idv remove` ──────────────────────────────────────────────────────────────

async fn cmd_remove(service: &VaultService, id: &str) -> Result<()> {
    let password = read_password("Vault password: ", false)?;
    let removal = service.remove_identity_from_vault(id, password).await?;
    println!(
        "removed: {} ({} remaining)",
        removal.removed_id_string, removal.remaining_count
    );
    Ok(())
}

// ── `idv login` / `idv logout` ────────────────────────────────────────────────

async fn cmd_login(service: &VaultService, ids: &[String]) -> Result<()> {
    unlock(service).await?;
    match service.login_selected(ids).await {
        Ok(outcome) => {
            for name in outcome.activated_names {
                println!("active: {name}");
            }
            Ok(())
        }
        Err(e) => {
            let partial = service.session().active_ids().await;
            if !partial.is_empty() {
                eprintln!("still active on the proxy: {}", partial.join(", "));
            }
            Err(e.into())
        }
    }
}

async fn cmd_logout(service: &VaultService) -> Result<()> {
    let report = service.logout().await;

    for id in &report.deactivated {
        println!("deactivated: {id}");
    }
    for (id, err) in &report.failures {
        eprintln!("failed to deactivate {id}: {err}");
    }
    if let Some(err) = &report.listing_error {
        eprintln!("could not list active identities: {err}");
    }
    if report.is_clean() {
        println!("logged out");
    }
    Ok(())
}

// ── `idv active` / `idv deactivate` ───────────────────────────────────────────

async fn cmd_active(service: &VaultService) -> Result<()> {
    let active = service.active_identities().await?;
    if active.is_empty() {
        println!("no active identities");
        return Ok(());
    }
    for identity in active {
        let name = if identity.identity_name.is_empty() {
            &identity.identity_id
        } else {
            &identity.identity_name
        };
        if identity.services.is_empty() {
            println!("{}  {name}", identity.identity_id);
        } else {
            println!(
                "{}  {name}  [{}]",
                identity.identity_id,
                identity.services.join(", ")
            );
        }
    }
    Ok(())
}

async fn cmd_deactivate(service: &VaultService, id: &str) -> Result<()> {
    service.deactivate(id).await?;
    println!("deactivated: {id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_login_requires_ids() {
        assert!(Cli::try_parse_from(["idv", "login"]).is_err());
        let cli = Cli::try_parse_from(["idv", "login", "a", "b"]).unwrap();
        assert!(matches!(cli.command, Commands::Login { ref ids } if ids.len() == 2));
    }

    #[test]
    fn test_file_name_of() {
        assert_eq!(
            file_name_of(Path::new("/tmp/tokens/laptop.jwt")).as_deref(),
            Some("laptop.jwt")
        );
    }
}
