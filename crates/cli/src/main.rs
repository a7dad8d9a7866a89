//! Operator CLI for the wharf registry filesystem.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wharf_core::{Credentials, RegistryConfig, UploadConfig};
use wharf_registry::{RegistryFs, upload_file};

#[derive(Parser)]
#[command(name = "wharfctl")]
#[command(about = "Read registry blobs and push files through the wharf filesystem")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "WHARF_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct AuthArgs {
    /// Registry username (overrides WHARF_USERNAME)
    #[arg(long)]
    username: Option<String>,

    /// Registry password (overrides WHARF_PASSWORD)
    #[arg(long)]
    password: Option<String>,
}

impl AuthArgs {
    fn credentials(&self) -> Credentials {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Credentials::basic(username, password),
            _ => Credentials::from_env(),
        }
    }
}

#[derive(Args, Clone)]
struct ClientArgs {
    /// PEM bundle overriding the TLS trust anchors
    #[arg(long)]
    ca_file: Option<PathBuf>,

    /// Operation deadline in milliseconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl ClientArgs {
    /// Layer the flags over the loaded registry config.
    fn registry_config(&self, mut config: RegistryConfig) -> RegistryConfig {
        if let Some(path) = &self.ca_file {
            config.ca_file = Some(path.clone());
        }
        if let Some(ms) = self.timeout {
            config.timeout_ms = Some(ms);
        }
        config
    }

    /// Layer the flags over the loaded upload config.
    fn upload_config(&self, mut config: UploadConfig) -> UploadConfig {
        if let Some(path) = &self.ca_file {
            config.ca_file = Some(path.clone());
        }
        if let Some(ms) = self.timeout {
            config.timeout_ms = Some(ms);
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the size of a blob
    Stat {
        /// Blob URL, e.g. https://registry/v2/<name>/blobs/<digest>
        url: String,
        /// Accelerator address, e.g. a local P2P proxy
        #[arg(long)]
        accelerator: Option<String>,
        #[command(flatten)]
        client: ClientArgs,
        #[command(flatten)]
        auth: AuthArgs,
    },
    /// Read a blob, or a range of it, to stdout or a file
    Cat {
        /// Blob URL
        url: String,
        /// Byte offset to start reading at
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Bytes to read; defaults to the rest of the blob
        #[arg(long)]
        length: Option<u64>,
        /// Output path; defaults to stdout
        #[arg(long)]
        output: Option<PathBuf>,
        /// Accelerator address, e.g. a local P2P proxy
        #[arg(long)]
        accelerator: Option<String>,
        #[command(flatten)]
        client: ClientArgs,
        #[command(flatten)]
        auth: AuthArgs,
    },
    /// Push a local file to a registry upload URL and print its digest
    Push {
        /// Local file to push
        file: PathBuf,
        /// Upload URL from POST /v2/<name>/blobs/uploads/
        upload_url: String,
        #[command(flatten)]
        client: ClientArgs,
        #[command(flatten)]
        auth: AuthArgs,
    },
}

/// Complete CLI configuration, merged from file and environment.
#[derive(Debug, Default, Deserialize)]
struct AppConfig {
    #[serde(default)]
    registry: RegistryConfig,
    #[serde(default)]
    upload: UploadConfig,
}

fn load_config(path: Option<&str>) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment
        .merge(Env::prefixed("WHARF_").split("__"))
        .extract()
        .context("failed to load configuration")
}

fn build_fs(config: &RegistryConfig, credentials: Credentials) -> Result<RegistryFs> {
    let fs = RegistryFs::new(config, Box::new(move |_url| credentials.clone()))?;
    Ok(fs)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Stat {
            url,
            accelerator,
            client,
            auth,
        } => {
            let registry = client.registry_config(config.registry);
            let fs = build_fs(&registry, auth.credentials())?;
            if let Some(addr) = accelerator.as_deref() {
                fs.set_accelerator_address(addr);
            }
            let meta = fs.stat(&url).await?;
            println!("{}\t{}", meta.size, url);
        }
        Commands::Cat {
            url,
            offset,
            length,
            output,
            accelerator,
            client,
            auth,
        } => {
            let registry = client.registry_config(config.registry);
            let fs = build_fs(&registry, auth.credentials())?;
            if let Some(addr) = accelerator.as_deref() {
                fs.set_accelerator_address(addr);
            }
            let file = fs.open(&url).await?;
            let size = file.metadata().await?.size;
            let end = match length {
                Some(length) => offset.saturating_add(length).min(size),
                None => size,
            };

            let mut out: Box<dyn tokio::io::AsyncWrite + Unpin> = match output {
                Some(path) => Box::new(
                    tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("failed to create {}", path.display()))?,
                ),
                None => Box::new(tokio::io::stdout()),
            };

            let mut buf = vec![0u8; 256 * 1024];
            let mut pos = offset;
            while pos < end {
                let want = ((end - pos) as usize).min(buf.len());
                let n = file.read_at(&mut buf[..want], pos).await?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n]).await?;
                pos += n as u64;
            }
            out.flush().await?;
        }
        Commands::Push {
            file,
            upload_url,
            client,
            auth,
        } => {
            let upload = client.upload_config(config.upload);
            match upload_file(&file, &upload_url, auth.credentials(), &upload).await? {
                Some(digest) => println!("{}", digest.digest()),
                None => tracing::warn!(file = %file.display(), "empty file, nothing pushed"),
            }
        }
    }

    Ok(())
}
