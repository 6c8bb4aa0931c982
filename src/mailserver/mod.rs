// Mail exchange server: framing, commands, storage and abuse guard
//
// Requests arrive as length-prefixed frames, are decoded into one of a fixed
// set of commands and run against a file-backed spool. All cross-connection
// coordination goes through advisory file locks, never shared memory.

pub mod auth;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod frame;
pub mod guard;
pub mod lock;
pub mod mailbox;
pub mod message;
pub mod server;
pub mod session;

pub use auth::{hash_secret, Authenticator, CredentialDirectory};
pub use cli::{ClientCli, ServeArgs, ServerCli, ServerCommand};
pub use client::MailClient;
pub use commands::{Command, CommandOutcome, Dispatcher};
pub use config::ServerConfig;
pub use frame::{read_frame, write_frame, FrameError, MAX_FRAME_LEN};
pub use guard::{AbuseGuard, Clock, GuardPolicy, ManualClock, SystemClock};
pub use lock::{LockGuard, LockMode};
pub use mailbox::MailboxStore;
pub use message::{Message, MessageId, MessageSummary};
pub use server::{serve_connection, ConnectionLimits, MailServer, ServerHandle};
pub use session::Session;
