// CLI definitions for the server and client binaries

use clap::{Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

/// Server CLI
#[derive(Debug, Parser)]
#[command(name = "mailspool-server")]
#[command(about = "Store-and-forward mail exchange over a length-prefixed TCP protocol")]
pub struct ServerCli {
    #[command(subcommand)]
    pub command: ServerCommand,
}

/// Server subcommands
#[derive(Debug, Subcommand)]
pub enum ServerCommand {
    /// Accept client connections and serve the spool
    Serve(ServeArgs),

    /// Print a credentials-file line for an identity
    HashSecret {
        /// Identity (mailbox owner)
        identity: String,

        /// Plaintext secret
        secret: String,
    },
}

/// Options for `serve`; anything given here overrides the config file
#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    /// TCP port to listen on
    pub port: Option<u16>,

    /// Mail spool directory
    pub spool_dir: Option<PathBuf>,

    /// Address to bind (default: all interfaces)
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Credentials file of `identity sha256hex` lines
    #[arg(long)]
    pub credentials: Option<PathBuf>,

    /// Abuse guard state file (default: <spool>/.guard/blacklist)
    #[arg(long)]
    pub guard_state: Option<PathBuf>,

    /// Failed logins per address and identity before blacklisting
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Blacklist duration in seconds
    #[arg(long)]
    pub block_secs: Option<u64>,

    /// Close connections idle for this many seconds
    #[arg(long)]
    pub idle_timeout: Option<u64>,
}

/// Interactive client CLI
#[derive(Debug, Parser)]
#[command(name = "mailspool-client")]
#[command(about = "Send requests to a mailspool server; end each request with a line containing only '.'")]
pub struct ClientCli {
    /// Server host or IP
    pub host: String,

    /// Server port
    pub port: u16,

    /// Reply timeout in seconds
    #[arg(short, long, default_value = "10")]
    pub timeout: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_parsing() {
        let cli = ServerCli::try_parse_from(["mailspool-server", "serve", "8025", "/var/spool/mail"]).unwrap();
        let ServerCommand::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.port, Some(8025));
        assert_eq!(args.spool_dir, Some(PathBuf::from("/var/spool/mail")));
        assert!(args.credentials.is_none());

        let cli = ServerCli::try_parse_from([
            "mailspool-server",
            "serve",
            "--config",
            "server.json",
            "--max-attempts",
            "5",
            "--block-secs",
            "120",
        ])
        .unwrap();
        let ServerCommand::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.port, None);
        assert_eq!(args.max_attempts, Some(5));
        assert_eq!(args.block_secs, Some(120));
    }

    #[test]
    fn test_hash_secret_parsing() {
        let cli = ServerCli::try_parse_from(["mailspool-server", "hash-secret", "alice", "pw"]).unwrap();
        assert!(matches!(cli.command, ServerCommand::HashSecret { .. }));

        assert!(ServerCli::try_parse_from(["mailspool-server", "hash-secret", "alice"]).is_err());
    }

    #[test]
    fn test_client_parsing() {
        let cli = ClientCli::try_parse_from(["mailspool-client", "127.0.0.1", "8025"]).unwrap();
        assert_eq!(cli.port, 8025);
        assert_eq!(cli.timeout, 10);

        assert!(ClientCli::try_parse_from(["mailspool-client", "127.0.0.1"]).is_err());
    }
}
