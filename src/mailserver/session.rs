// Per-connection session state

use std::net::SocketAddr;
use uuid::Uuid;

/// Authentication state of one connection
///
/// Created when a connection is accepted and dropped when it closes. Only
/// LOGIN sets the identity; every other command reads it.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub peer: SocketAddr,
    identity: Option<String>,
}

impl Session {
    /// Fresh, unauthenticated session for a peer
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            identity: None,
        }
    }

    /// Peer IP as used for abuse tracking
    pub fn peer_ip(&self) -> String {
        self.peer.ip().to_string()
    }

    /// Authenticated identity, if any
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// Mark the session as logged in
    pub fn authenticate(&mut self, identity: impl Into<String>) {
        self.identity = Some(identity.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_login() {
        let peer: SocketAddr = "192.168.1.20:40000".parse().unwrap();
        let mut session = Session::new(peer);

        assert!(!session.is_authenticated());
        assert_eq!(session.identity(), None);
        assert_eq!(session.peer_ip(), "192.168.1.20");

        session.authenticate("alice");
        assert_eq!(session.identity(), Some("alice"));
    }

    #[test]
    fn test_session_ids_unique() {
        let peer: SocketAddr = "[::1]:1".parse().unwrap();
        assert_ne!(Session::new(peer).id, Session::new(peer).id);
        assert_eq!(Session::new(peer).peer_ip(), "::1");
    }
}
