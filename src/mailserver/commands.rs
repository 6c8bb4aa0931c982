// Command decoding and dispatch
//
// A request is a list of lines: the command name followed by its arguments.
// Handlers are plain blocking functions over the session, the mailbox store
// and the abuse guard; they always produce a reply and never an error, since
// every failure is reported to the client as a bare `ERR`.

use crate::error::Result;
use crate::mailserver::auth::Authenticator;
use crate::mailserver::guard::AbuseGuard;
use crate::mailserver::mailbox::MailboxStore;
use crate::mailserver::message::{Message, MessageId};
use crate::mailserver::session::Session;
use std::fmt::Write as _;
use std::sync::Arc;

/// Positive acknowledgement
pub const OK: &str = "OK\n";
/// Generic failure; deliberately carries no detail
pub const ERR: &str = "ERR\n";

/// The fixed command set of the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Login,
    Send,
    List,
    Read,
    Del,
    Quit,
}

impl Command {
    /// Decode a command name; names are case-sensitive
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "LOGIN" => Some(Self::Login),
            "SEND" => Some(Self::Send),
            "LIST" => Some(Self::List),
            "READ" => Some(Self::Read),
            "DEL" => Some(Self::Del),
            "QUIT" => Some(Self::Quit),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Login => "LOGIN",
            Self::Send => "SEND",
            Self::List => "LIST",
            Self::Read => "READ",
            Self::Del => "DEL",
            Self::Quit => "QUIT",
        }
    }
}

/// Result of executing one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Close the connection after sending `response`
    pub should_close: bool,
    /// Reply payload; empty means nothing is sent
    pub response: String,
}

impl CommandOutcome {
    pub fn reply(response: impl Into<String>) -> Self {
        Self {
            should_close: false,
            response: response.into(),
        }
    }

    pub fn ok() -> Self {
        Self::reply(OK)
    }

    pub fn err() -> Self {
        Self::reply(ERR)
    }

    /// Close silently
    pub fn close() -> Self {
        Self {
            should_close: true,
            response: String::new(),
        }
    }
}

/// Split a request payload into lines on `\n`
///
/// A trailing newline yields a trailing empty line, which body handling keeps.
pub fn split_lines(payload: &str) -> Vec<String> {
    payload.split('\n').map(str::to_string).collect()
}

/// Routes requests to their handlers
///
/// Holds the shared services explicitly; there is no global state.
#[derive(Clone)]
pub struct Dispatcher {
    store: MailboxStore,
    guard: AbuseGuard,
    directory: Arc<dyn Authenticator>,
}

impl Dispatcher {
    pub fn new(store: MailboxStore, guard: AbuseGuard, directory: Arc<dyn Authenticator>) -> Self {
        Self {
            store,
            guard,
            directory,
        }
    }

    pub fn store(&self) -> &MailboxStore {
        &self.store
    }

    pub fn guard(&self) -> &AbuseGuard {
        &self.guard
    }

    /// Execute one request against the session
    ///
    /// Blocks on file locks and file I/O; call it off the async executor.
    pub fn dispatch(&self, session: &mut Session, lines: &[String]) -> CommandOutcome {
        let Some((name, args)) = lines.split_first() else {
            return CommandOutcome::err();
        };

        let Some(command) = Command::from_name(name) else {
            tracing::debug!("Unknown command {:?}", name);
            return CommandOutcome::err();
        };

        tracing::debug!("{} with {} argument line(s)", command.name(), args.len());

        match command {
            Command::Login => self.handle_login(session, args),
            Command::Send => self.handle_send(session, args),
            Command::List => self.handle_list(session),
            Command::Read => self.handle_read(session, args),
            Command::Del => self.handle_del(session, args),
            Command::Quit => CommandOutcome::close(),
        }
    }

    /// LOGIN identity secret
    fn handle_login(&self, session: &mut Session, args: &[String]) -> CommandOutcome {
        let [identity, secret, ..] = args else {
            return CommandOutcome::err();
        };
        let identity = identity.trim();
        let ip = session.peer_ip();

        // Never consult the directory on behalf of a blocked address
        if self.guard.is_blacklisted(&ip) {
            tracing::warn!("Refused login for {} from blacklisted {}", identity, ip);
            return CommandOutcome::err();
        }

        if self.directory.authenticate(identity, secret) {
            if let Err(e) = self.guard.record_success(&ip, identity) {
                tracing::warn!("Could not reset login attempts for {}: {}", identity, e);
            }
            session.authenticate(identity);
            tracing::info!("{} logged in from {}", identity, ip);
            return CommandOutcome::ok();
        }

        match self.guard.record_failure(&ip, identity) {
            Ok(true) => tracing::warn!("Blacklisted {} after failed logins for {}", ip, identity),
            Ok(false) => tracing::info!("Failed login for {} from {}", identity, ip),
            Err(e) => tracing::warn!("Could not record failed login from {}: {}", ip, e),
        }
        // Same reply whether or not this attempt triggered the block
        CommandOutcome::err()
    }

    /// SEND to subject bodyLine...
    fn handle_send(&self, session: &Session, args: &[String]) -> CommandOutcome {
        let Some(from) = session.identity() else {
            return CommandOutcome::err();
        };
        let [to, subject, body @ ..] = args else {
            return CommandOutcome::err();
        };

        let message = Message::from_body_lines(from, to.as_str(), subject.as_str(), body);
        self.complete(Command::Send, self.store.deliver(&message), |id| {
            tracing::info!("Delivered message {} from {} to {}", id, from, to);
            CommandOutcome::ok()
        })
    }

    /// LIST
    fn handle_list(&self, session: &Session) -> CommandOutcome {
        let Some(owner) = session.identity() else {
            return CommandOutcome::err();
        };

        self.complete(Command::List, self.store.list(owner), |summaries| {
            let mut response = format!("{}\n", summaries.len());
            for summary in &summaries {
                let _ = writeln!(response, "{}", summary.subject);
            }
            CommandOutcome::reply(response)
        })
    }

    /// READ id
    fn handle_read(&self, session: &Session, args: &[String]) -> CommandOutcome {
        let Some(owner) = session.identity() else {
            return CommandOutcome::err();
        };
        let Some(id) = args.first().and_then(|arg| MessageId::parse(arg)) else {
            return CommandOutcome::err();
        };

        self.complete(Command::Read, self.store.read(owner, id), |text| match text {
            Some(text) if !text.is_empty() => CommandOutcome::reply(format!("{}{}", OK, text)),
            _ => CommandOutcome::err(),
        })
    }

    /// DEL id
    fn handle_del(&self, session: &Session, args: &[String]) -> CommandOutcome {
        let Some(owner) = session.identity() else {
            return CommandOutcome::err();
        };
        let Some(id) = args.first().and_then(|arg| MessageId::parse(arg)) else {
            return CommandOutcome::err();
        };

        self.complete(Command::Del, self.store.delete(owner, id), |removed| {
            if removed {
                tracing::info!("{} deleted message {}", owner, id);
                CommandOutcome::ok()
            } else {
                CommandOutcome::err()
            }
        })
    }

    /// Map a storage result to a reply, logging failures
    fn complete<T>(
        &self,
        command: Command,
        result: Result<T>,
        on_success: impl FnOnce(T) -> CommandOutcome,
    ) -> CommandOutcome {
        match result {
            Ok(value) => on_success(value),
            Err(e) => {
                tracing::warn!("{} failed: {}", command.name(), e);
                CommandOutcome::err()
            }
        }
    }
}
