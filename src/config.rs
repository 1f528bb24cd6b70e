use anyhow::{Context, Result, ensure};
use clap::Parser;
use std::{env, str::FromStr};

use crate::services::blob_service::DEFAULT_CHUNK_SIZE;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub chunk_size: usize,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Raw material image store API")]
pub struct Args {
    /// Host to bind to (overrides RMC_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides RMC_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where image chunks are stored (overrides RMC_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL for the object index (overrides RMC_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Chunk size in bytes (overrides RMC_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Largest accepted upload request in bytes (overrides RMC_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read `name` from the environment, parsing it when present.
fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    pub fn merge(args: Args) -> Result<Self> {
        let env_host = env::var("RMC_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parsed("RMC_PORT", 8080u16)?;
        let env_storage = env::var("RMC_STORAGE_DIR").unwrap_or_else(|_| "./data/chunks".into());
        let env_db =
            env::var("RMC_DATABASE_URL").unwrap_or_else(|_| "sqlite://./data/meta/rmc.db".into());
        let env_chunk_size = env_parsed("RMC_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        let env_max_upload = env_parsed("RMC_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            chunk_size: args.chunk_size.unwrap_or(env_chunk_size),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        };

        ensure!(cfg.chunk_size > 0, "chunk size must be greater than zero");
        ensure!(
            cfg.max_upload_bytes > 0,
            "max upload size must be greater than zero"
        );
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
