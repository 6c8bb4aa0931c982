// mailspool server binary

use anyhow::Context;
use clap::Parser;
use mailspool::mailserver::{
    hash_secret, Authenticator, CredentialDirectory, MailServer, ServeArgs, ServerCli,
    ServerCommand, ServerConfig,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailspool=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = ServerCli::parse();

    let result = match cli.command {
        ServerCommand::Serve(args) => serve(args).await,
        ServerCommand::HashSecret { identity, secret } => {
            println!("{} {}", identity, hash_secret(&secret));
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = ServerConfig::from_args(&args)?;

    let directory = match &config.credentials_file {
        Some(path) => CredentialDirectory::load(path)?,
        None => {
            tracing::warn!("No credentials file configured; every login will be refused");
            CredentialDirectory::new()
        }
    };
    tracing::info!("Loaded {} identities", directory.len());
    let directory: Arc<dyn Authenticator> = Arc::new(directory);

    let server = MailServer::bind(&config, directory).await?;
    tracing::info!(
        "Serving spool {:?} on {} (guard state {:?})",
        config.spool_dir,
        server.local_addr()?,
        config.guard_state_path()
    );
    let handle = server.spawn()?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    tracing::info!("Stopping server");
    handle.shutdown().await
}
