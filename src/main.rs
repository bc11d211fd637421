use anyhow::Context;
use certkeeper::challenge::{ChallengeCoordinator, responder};
use certkeeper::config;
use certkeeper::manager::{CertificateManager, ProcessRole};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const ENV_FILTER_NAME: &str = "CERTKEEPER_LOG";

#[derive(Debug, Parser)]
#[command(version, about, long_about = "")]
struct CommandLineArguments {
    /// Path to the configuration file
    #[arg(short, long, env = "CERTKEEPER_CONFIG", default_value = "certkeeper.toml")]
    config: PathBuf,
    /// Answer HTTP-01 challenges on this address while certificates are obtained
    #[arg(short, long, env = "CERTKEEPER_LISTEN")]
    listen: Option<SocketAddr>,
    /// How this process coordinates with other processes sharing the same storage
    #[arg(long, value_enum, default_value_t = Role::Standalone)]
    role: Role,
    /// Shorthand option to enable debug logging (logging can be fine-tuned via `CERTKEEPER_LOG` environment variable)
    #[clap(long, short, action)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Role {
    Standalone,
    Primary,
    Worker,
}

impl From<Role> for ProcessRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Standalone => ProcessRole::Standalone,
            Role::Primary => ProcessRole::Primary,
            Role::Worker => ProcessRole::Worker,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CommandLineArguments::parse();
    let filter = EnvFilter::try_from_env(ENV_FILTER_NAME).unwrap_or_else(|_| {
        EnvFilter::try_from_env("RUST_LOG")
            .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "certkeeper=debug,info" } else { "info" }))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let configuration = config::load(&cli.config)?;
    let store = configuration.open_store().await?;
    let lock = configuration.open_lock().await?;
    let coordinator = ChallengeCoordinator::new().with_store(store.clone());
    let manager = CertificateManager::new(
        configuration.manager_config()?,
        store,
        lock,
        cli.role.into(),
        coordinator.clone(),
    );

    let shutdown = CancellationToken::new();
    let server = match cli.listen {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .context(format!("Failed to listen on {addr}"))?;
            info!("Answering HTTP-01 challenges on {addr}");
            Some(tokio::spawn(responder::serve(
                listener,
                coordinator,
                shutdown.clone(),
            )))
        }
        None => {
            warn!("No --listen address given, HTTP-01 challenges must be answered by another process");
            None
        }
    };

    manager.release_stale_locks().await?;
    let result = manager.get_default().await;

    shutdown.cancel();
    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Challenge responder failed: {e}"),
            Err(e) => error!("Challenge responder task failed: {e}"),
        }
    }

    let default = result.context("Obtaining certificates failed")?;
    info!("Default certificate: {}", default.domain);
    for domain in &configuration.domains {
        match manager.get_secure_context(domain) {
            Some(_) => info!("Certificate for {domain} is ready"),
            None => warn!("No certificate available for {domain}"),
        }
    }
    Ok(())
}
