// Client side of the framed protocol

use crate::mailserver::commands::{ERR, OK};
use crate::mailserver::frame::{read_frame, write_frame, MAX_FRAME_LEN};
use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};

/// Default time to wait for a reply
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest reply the client will accept; listings can outgrow a request
const MAX_REPLY_LEN: u32 = 16 * MAX_FRAME_LEN;

/// A connection to a mailspool server
pub struct MailClient {
    stream: TcpStream,
    timeout: Duration,
}

impl MailClient {
    /// Connect to a server
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("Failed to connect to server")?;

        Ok(Self {
            stream,
            timeout: DEFAULT_REPLY_TIMEOUT,
        })
    }

    /// Change the reply timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a raw request payload and wait for the reply
    pub async fn request_raw(&mut self, payload: &str) -> Result<String> {
        self.send_frame(payload).await?;

        let reply = tokio::time::timeout(self.timeout, read_frame(&mut self.stream, MAX_REPLY_LEN))
            .await
            .context("Timed out waiting for reply")?
            .context("Disconnected while waiting for reply")?;

        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    /// Send a request given as lines and wait for the reply
    pub async fn request(&mut self, lines: &[&str]) -> Result<String> {
        self.request_raw(&lines.join("\n")).await
    }

    /// LOGIN; `true` if the server accepted the credentials
    pub async fn login(&mut self, identity: &str, secret: &str) -> Result<bool> {
        Ok(self.request(&["LOGIN", identity, secret]).await? == OK)
    }

    /// SEND a message; the body may span several lines
    ///
    /// One trailing newline is dropped, since the server terminates the
    /// stored body itself.
    pub async fn send(&mut self, to: &str, subject: &str, body: &str) -> Result<bool> {
        let body = body.strip_suffix('\n').unwrap_or(body);
        let mut lines = vec!["SEND", to, subject];
        if !body.is_empty() {
            lines.extend(body.split('\n'));
        }
        Ok(self.request(&lines).await? == OK)
    }

    /// LIST; subjects in ID order, or `None` if the server refused
    pub async fn list(&mut self) -> Result<Option<Vec<String>>> {
        let reply = self.request(&["LIST"]).await?;
        if reply == ERR {
            return Ok(None);
        }

        let mut lines = reply.lines();
        let count: usize = lines
            .next()
            .and_then(|line| line.parse().ok())
            .with_context(|| format!("Malformed LIST reply {:?}", reply))?;

        let subjects: Vec<String> = lines.map(str::to_string).collect();
        if subjects.len() != count {
            bail!("LIST announced {} messages but returned {}", count, subjects.len());
        }
        Ok(Some(subjects))
    }

    /// READ; the stored message text, or `None` on `ERR`
    pub async fn read(&mut self, id: u64) -> Result<Option<String>> {
        let reply = self.request(&["READ", &id.to_string()]).await?;
        Ok(reply.strip_prefix(OK).map(str::to_string))
    }

    /// DEL; `true` if the message existed and was removed
    pub async fn delete(&mut self, id: u64) -> Result<bool> {
        Ok(self.request(&["DEL", &id.to_string()]).await? == OK)
    }

    /// QUIT and close; the server sends no reply
    pub async fn quit(mut self) -> Result<()> {
        self.send_frame("QUIT").await?;
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    async fn send_frame(&mut self, payload: &str) -> Result<()> {
        if payload.is_empty() {
            bail!("Refusing to send an empty request");
        }
        if payload.len() > MAX_FRAME_LEN as usize {
            bail!(
                "Request too large ({} bytes, max {} bytes)",
                payload.len(),
                MAX_FRAME_LEN
            );
        }

        write_frame(&mut self.stream, payload.as_bytes())
            .await
            .context("Failed to send request")
    }
}
