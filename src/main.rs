use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use designtimes::config::Config;
use designtimes::storage::{Article, FileStore, Storage, StorageError, StorageKey, Subscription};

/// Get the config directory path (~/.config/designtimes/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("designtimes"))
}

/// Create the config directory with user-only permissions.
fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    name = "designtimes",
    about = "Manage The Design Times local library, upvotes and backups"
)]
struct Args {
    /// Config file (defaults to ~/.config/designtimes/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show used and remaining storage space
    Info,

    /// Export the reading list and upvotes to a dated backup file
    Export {
        /// Directory to write the backup into
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    /// Merge a backup file into the local library
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Remove every key this application stores
    Reset,

    /// Trim the contact message log to free space
    Cleanup,

    /// Print the JSON stored under a key
    Get {
        #[arg(value_name = "KEY")]
        key: String,
    },

    /// List the saved reading list
    Library,

    /// Add an email to the newsletter subscriber list
    Subscribe {
        #[arg(value_name = "EMAIL")]
        email: String,
    },

    /// Seed the article cache from a JSON array of articles
    Seed {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    ensure_config_dir(&config_dir)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let data_path = config.data_path(&config_dir);
    let mut store = FileStore::open(&data_path)
        .with_context(|| format!("Failed to open storage file {}", data_path.display()))?;
    if let Some(limit) = config.hard_limit_bytes {
        store = store.with_capacity(limit);
    }
    let storage = Storage::with_limits(store, config.limits());

    match args.command {
        Command::Info => {
            let info = storage.storage_info();
            println!("Storage file: {}", storage.store().path().display());
            println!("Used:         {} ({}%)", info.used, info.percent_used);
            println!("Remaining:    {}", info.remaining);
            if storage.is_near_limit() {
                eprintln!("Warning: storage is nearly full. Run `designtimes cleanup` or export and reset.");
            }
        }
        Command::Export { dir } => {
            let dir = dir
                .or_else(|| config.backup_dir.clone())
                .unwrap_or_else(|| PathBuf::from("."));
            let path = storage
                .write_backup(&dir, &config.app_name)
                .await
                .context("Failed to export library")?;
            println!("Exported library to: {}", path.display());
        }
        Command::Import { file } => {
            let outcome = storage.import_library(&file).await;
            if !outcome.success {
                anyhow::bail!("{}", outcome.message);
            }
            println!("{}", outcome.message);
        }
        Command::Reset => {
            if !storage.clear_all() {
                anyhow::bail!("Some keys could not be removed; storage may be unavailable");
            }
            println!("All app data cleared.");
        }
        Command::Cleanup => {
            let removed = storage.cleanup();
            println!("Removed {} old contact messages.", removed);
        }
        Command::Get { key } => {
            if StorageKey::from_name(&key).is_none() {
                tracing::warn!(key = %key, "Key is not part of the application catalogue");
            }
            match storage.try_get::<serde_json::Value>(&key) {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(StorageError::NotFound(_)) => println!("(not set)"),
                Err(e) => anyhow::bail!("{}", e),
            }
        }
        Command::Library => {
            let library = storage.library();
            if library.is_empty() {
                println!("Reading list is empty.");
            }
            let upvoted = storage.upvotes();
            for article in &library {
                let marker = if upvoted.contains(&article.id) { "▲" } else { " " };
                println!("{} {}  [{}] {}", marker, article.id, article.publisher, article.title);
            }
        }
        Command::Subscribe { email } => match storage.subscribe(&email)? {
            Subscription::New => println!("Subscribed {}.", email.trim().to_lowercase()),
            Subscription::AlreadySubscribed => println!("Already subscribed."),
        },
        Command::Seed { file } => {
            let content = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read seed file: {}", file.display()))?;
            let defaults: Vec<Article> =
                serde_json::from_str(&content).context("Seed file must be a JSON array of articles")?;

            let articles = storage.load_articles(&defaults);
            if !storage.save_articles(&articles) {
                anyhow::bail!("Failed to save article cache");
            }
            println!("Article cache holds {} articles.", articles.len());
        }
    }

    Ok(())
}
