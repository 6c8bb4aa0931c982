// mailspool interactive client
//
// Each request is typed as lines and terminated by a line holding only ".".

use clap::Parser;
use mailspool::mailserver::{ClientCli, MailClient, MAX_FRAME_LEN};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const REQUEST_TERMINATOR: &str = ".";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = ClientCli::parse();
    println!("Connecting to {}:{}", cli.host, cli.port);

    let client = MailClient::connect((cli.host.as_str(), cli.port))
        .await?
        .with_timeout(Duration::from_secs(cli.timeout));

    if let Err(e) = run(client).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(mut client: MailClient) -> anyhow::Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut buffer = String::new();

    while let Some(line) = stdin.next_line().await? {
        if line != REQUEST_TERMINATOR {
            if !buffer.is_empty() {
                buffer.push('\n');
            }
            buffer.push_str(&line);
            continue;
        }

        if buffer.is_empty() {
            eprintln!("Request is empty; type lines, then '{}'", REQUEST_TERMINATOR);
            continue;
        }
        if buffer.len() > MAX_FRAME_LEN as usize {
            eprintln!(
                "Request too large ({} bytes). Max is {} bytes.",
                buffer.len(),
                MAX_FRAME_LEN
            );
            buffer.clear();
            continue;
        }

        if buffer == "QUIT" {
            return client.quit().await;
        }

        let reply = client.request_raw(&buffer).await?;
        print!("Server:\n{}", reply);
        buffer.clear();
    }

    client.quit().await
}
