//! mailspool - store-and-forward mail exchange
//!
//! Clients log in, send messages to other identities, and list, read and
//! delete messages in their own mailbox over a private length-prefixed TCP
//! protocol. Mailboxes and login abuse state live on disk behind advisory
//! file locks, so any number of connection handlers can share them safely.

pub mod error;
pub mod mailserver;

pub use error::{MailError, Result};
pub use mailserver::{Dispatcher, MailClient, MailServer, ServerConfig};
