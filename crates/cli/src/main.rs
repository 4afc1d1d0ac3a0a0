//! Command line client for icebox.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use icebox_core::config::default_config_path;
use icebox_core::{ConfigProvider, FileConfigProvider, IceboxConfig, timestamp};
use icebox_engine::{
    CheckOptions, EXIT_FAILURE, OpError, RetrieveOptions, Session, SyncOptions,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const PROGRAM_NAME: &str = "icebox";
const DEFAULT_LOG_FILTER: &str = "icebox=info,warn";
/// How long a cancelled command may take to wind down on its own.
const CANCEL_GRACE: Duration = Duration::from_secs(2);
const SEPARATOR: &str = "------------------------------";

#[derive(Parser)]
#[command(name = "icebox")]
#[command(about = "Archive storage in cold vaults, with a local metadata cache")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct GlobalArgs {
    /// Region to use instead of the configured one
    #[arg(long, global = true)]
    region: Option<String>,

    /// Config file path
    #[arg(long, global = true, env = "ICEBOX_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Vault commands
    Vault {
        #[command(subcommand)]
        command: VaultCommands,
    },
    /// Archive commands
    Archive {
        #[command(subcommand)]
        command: ArchiveCommands,
    },
    /// Remote job commands
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Change one setting
    Set {
        key: ConfigKey,
        value: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ConfigKey {
    /// Default region
    Region,
    /// Refuse retrievals beyond the daily free allowance (yes/no)
    FreeTier,
    /// Maximum number of days to wait for a retrieval
    Allowance,
}

#[derive(Subcommand)]
enum VaultCommands {
    /// List vaults in the region
    List,
    /// Create a vault
    Create { name: String },
    /// Delete an empty vault
    Delete { name: String },
    /// Update the cached archive list from a vault inventory
    Sync {
        name: String,
        /// Wait for the inventory job to complete
        #[arg(long, default_value_t = false)]
        wait: bool,
        /// Forget archives that disappeared without explanation
        #[arg(long, default_value_t = false)]
        fix: bool,
        /// Reuse a completed inventory up to this many hours old
        #[arg(long, value_name = "HOURS", default_value_t = 24)]
        max_age: u32,
    },
}

#[derive(Subcommand)]
enum ArchiveCommands {
    /// List cached archives of a vault
    List { vault: String },
    /// Upload a file as a new archive
    Upload {
        vault: String,
        file: PathBuf,
        /// Archive name (default: the file's base name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete an archive
    Delete { vault: String, name: String },
    /// Retrieve archives, requesting retrieval jobs as needed
    Retrieve {
        vault: String,
        #[arg(required = true, num_args = 1..)]
        names: Vec<String>,
        /// Wait for retrieval jobs to complete
        #[arg(long, default_value_t = false)]
        wait: bool,
        /// Output file, or - for stdout (single archive only)
        #[arg(short = 'o', value_name = "OUTPUT_FILENAME")]
        output: Option<String>,
        /// Size of each ranged download in bytes
        #[arg(long, value_name = "BYTES")]
        multipart_size: Option<u64>,
    },
    /// Print the name if the archive is known to exist
    Checkpresent {
        vault: String,
        name: String,
        /// Wait for a sync if the cached record is too old
        #[arg(long, default_value_t = false)]
        wait: bool,
        /// Print nothing when the archive is not present
        #[arg(long, default_value_t = false)]
        quiet: bool,
        /// How recently the archive must have been seen, in hours
        #[arg(long, value_name = "HOURS", default_value_t = 80)]
        max_age: u32,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// List remote jobs in every vault
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let Cli { global, command } = Cli::parse();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupt received");
                cancel.cancel();
            }
        }
    });

    let result = tokio::select! {
        result = run(global, command, cancel.clone()) => result,
        _ = async {
            cancel.cancelled().await;
            tokio::time::sleep(CANCEL_GRACE).await;
        } => Err(OpError::Cancelled("command".to_string()).into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ICEBOX_LOG")
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<OpError>()
        .map_or(EXIT_FAILURE, OpError::exit_code)
}

fn report_error(err: &anyhow::Error) {
    let message = match err.downcast_ref::<OpError>() {
        Some(op) => op.to_string(),
        None => format!("{err:#}"),
    };
    eprintln!("{}", prefix_lines(&format!("{PROGRAM_NAME}: "), &message));
}

fn prefix_lines(prefix: &str, message: &str) -> String {
    message
        .lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn run(global: GlobalArgs, command: Commands, cancel: CancellationToken) -> Result<()> {
    match command {
        Commands::Config { command } => handle_config_command(command, &global).await,
        Commands::Vault { command } => {
            let session = open_session(&global, cancel).await?;
            handle_vault_command(command, &session).await
        }
        Commands::Archive { command } => {
            let session = open_session(&global, cancel).await?;
            handle_archive_command(command, &session).await
        }
        Commands::Job { command } => {
            let session = open_session(&global, cancel).await?;
            match command {
                JobCommands::List => {
                    for line in icebox_engine::list_jobs(&session).await? {
                        println!("{line}");
                    }
                    Ok(())
                }
            }
        }
    }
}

fn config_provider(global: &GlobalArgs) -> Result<FileConfigProvider> {
    let path = match &global.config {
        Some(path) => path.clone(),
        None => default_config_path().context("failed to locate config file")?,
    };
    Ok(FileConfigProvider::new(path))
}

async fn load_config(provider: &FileConfigProvider, global: &GlobalArgs) -> Result<IceboxConfig> {
    let mut config = provider
        .load()
        .await
        .with_context(|| format!("failed to load {}", provider.path().display()))?;
    if let Some(region) = &global.region {
        config.region = region.clone();
    }
    Ok(config)
}

async fn open_session(global: &GlobalArgs, cancel: CancellationToken) -> Result<Session> {
    let provider = config_provider(global)?;
    let config = load_config(&provider, global).await?;

    let cache_path = config.cache_path().context("failed to locate cache")?;
    let cache = icebox_metadata::open(&cache_path)
        .await
        .with_context(|| format!("failed to open cache at {}", cache_path.display()))?;
    let remote = icebox_remote::connect(&config.region)
        .await
        .context("failed to connect to the remote store")?;
    let session = Session::new(remote, cache, Arc::new(provider), config, cancel);
    debug!(
        region = %session.region(),
        account = %session.account_key(),
        cache = %cache_path.display(),
        "session ready"
    );
    Ok(session)
}

async fn handle_config_command(command: ConfigCommands, global: &GlobalArgs) -> Result<()> {
    let provider = config_provider(global)?;
    match command {
        ConfigCommands::Init { force } => {
            if provider.path().exists() && !force {
                anyhow::bail!(
                    "{} already exists; use --force to overwrite",
                    provider.path().display()
                );
            }
            provider
                .save(&IceboxConfig::default())
                .await
                .with_context(|| format!("failed to write {}", provider.path().display()))?;
            println!("{}", provider.path().display());
        }
        ConfigCommands::Show => {
            let config = load_config(&provider, global).await?;
            let rendered =
                toml::to_string_pretty(&config).context("failed to render configuration")?;
            print!("{rendered}");
        }
        ConfigCommands::Set { key, value } => {
            let mut config = provider
                .load()
                .await
                .with_context(|| format!("failed to load {}", provider.path().display()))?;
            match key {
                ConfigKey::Region => {
                    let region = value.trim();
                    if region.is_empty() {
                        anyhow::bail!("region cannot be empty");
                    }
                    config.region = region.to_string();
                }
                ConfigKey::FreeTier => config.retrieval.free_tier_only = parse_flag(&value)?,
                ConfigKey::Allowance => {
                    config.retrieval.max_retrieval_days = value
                        .trim()
                        .parse()
                        .with_context(|| format!("invalid number of days: {value:?}"))?;
                }
            }
            provider
                .save(&config)
                .await
                .with_context(|| format!("failed to write {}", provider.path().display()))?;
        }
    }
    Ok(())
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "on" | "1" => Ok(true),
        "no" | "n" | "false" | "off" | "0" => Ok(false),
        _ => anyhow::bail!("expected yes or no, got {value:?}"),
    }
}

async fn handle_vault_command(command: VaultCommands, session: &Session) -> Result<()> {
    match command {
        VaultCommands::List => {
            for name in icebox_engine::list_vaults(session).await? {
                println!("{name}");
            }
        }
        VaultCommands::Create { name } => icebox_engine::create_vault(session, &name).await?,
        VaultCommands::Delete { name } => icebox_engine::delete_vault(session, &name).await?,
        VaultCommands::Sync {
            name,
            wait,
            fix,
            max_age,
        } => {
            let options = SyncOptions {
                wait,
                fix,
                max_age: hours(max_age),
            };
            let report = icebox_engine::sync_vault(session, &name, options).await?;
            info!(
                vault = %name,
                warnings = report.warnings.len(),
                "sync complete"
            );
        }
    }
    Ok(())
}

async fn handle_archive_command(command: ArchiveCommands, session: &Session) -> Result<()> {
    match command {
        ArchiveCommands::List { vault } => {
            let listing = icebox_engine::list_archives(session, &vault).await?;
            match listing.last_synced {
                Some(at) => println!("LAST SYNCED DATE: {}", timestamp::format(at)),
                None => println!("LAST SYNCED DATE: never"),
            }
            match listing.last_inventory {
                Some(at) => println!("LAST INVENTORY DATE: {}", timestamp::format(at)),
                None => println!("NO INVENTORY DATE"),
            }
            println!("{SEPARATOR}");
            for entry in listing.entries {
                match (&entry.name, entry.contested) {
                    (Some(name), true) => println!("{}\t{name}", entry.reference),
                    _ => println!("{}", entry.reference),
                }
            }
        }
        ArchiveCommands::Upload { vault, file, name } => {
            icebox_engine::upload_archive(session, &vault, &file, name.as_deref()).await?;
        }
        ArchiveCommands::Delete { vault, name } => {
            icebox_engine::delete_archive(session, &vault, &name).await?;
        }
        ArchiveCommands::Retrieve {
            vault,
            names,
            wait,
            output,
            multipart_size,
        } => {
            let multipart_size = match multipart_size {
                Some(size) => check_multipart_size(size)?,
                None => session.config().retrieval.multipart_size,
            };
            let options = RetrieveOptions {
                wait,
                output,
                multipart_size,
            };
            for message in icebox_engine::retrieve_archives(session, &vault, &names, &options).await?
            {
                info!("{message}");
            }
        }
        ArchiveCommands::Checkpresent {
            vault,
            name,
            wait,
            quiet,
            max_age,
        } => {
            let options = CheckOptions {
                wait,
                max_age: hours(max_age),
            };
            let presence = icebox_engine::check_present(session, &vault, &name, options).await?;
            match presence.message(&name) {
                None => println!("{name}"),
                Some(message) if !quiet => eprintln!("{message}"),
                Some(_) => {}
            }
        }
    }
    Ok(())
}

fn hours(value: u32) -> time::Duration {
    time::Duration::hours(i64::from(value))
}

/// Ranged reads must be a power-of-two number of MiB.
fn check_multipart_size(size: u64) -> Result<u64> {
    const MIB: u64 = 1024 * 1024;
    if size < MIB || size % MIB != 0 || !(size / MIB).is_power_of_two() {
        anyhow::bail!("--multipart-size must be a power-of-two multiple of 1 MiB, got {size}");
    }
    Ok(size)
}
