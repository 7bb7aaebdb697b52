use crate::{sync_state::SceneSyncState, transport::ConnectionHandle};

/// Lifecycle of one remote party.
///
/// `Connecting → Authenticating → Authenticated → Disconnecting → Removed`.
/// A sync state exists only while `Authenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Authenticated,
    Disconnecting,
    Removed,
}

/// One remote party: its transport handle, lifecycle state, and (once
/// authenticated) the per-connection sync state tracking what this party
/// still needs to receive.
pub struct Connection {
    pub handle: ConnectionHandle,
    state: ConnectionState,
    pub sync_state: Option<SceneSyncState>,
}

impl Connection {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            state: ConnectionState::Connecting,
            sync_state: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    /// Transport-level connect observed.
    pub fn on_connected(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Authenticating;
        }
    }

    /// Login accepted: binds a fresh sync state. Returns false if the
    /// connection was not awaiting authentication.
    pub fn authenticate(&mut self) -> bool {
        if self.state != ConnectionState::Authenticating {
            return false;
        }
        self.state = ConnectionState::Authenticated;
        self.sync_state = Some(SceneSyncState::new());
        true
    }

    /// Transport close or server-side kick. Pending sync state is dropped
    /// without a final flush; no partial messages are ever sent.
    pub fn begin_disconnect(&mut self) {
        if self.state != ConnectionState::Removed {
            self.state = ConnectionState::Disconnecting;
            self.sync_state = None;
        }
    }

    pub fn remove(&mut self) {
        self.state = ConnectionState::Removed;
        self.sync_state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::{Connection, ConnectionState};

    #[test]
    fn lifecycle_transitions() {
        let mut connection = Connection::new(7);
        assert_eq!(connection.state(), ConnectionState::Connecting);
        connection.on_connected();
        assert_eq!(connection.state(), ConnectionState::Authenticating);
        assert!(connection.authenticate());
        assert!(connection.is_authenticated());
        assert!(connection.sync_state.is_some());
        connection.begin_disconnect();
        assert_eq!(connection.state(), ConnectionState::Disconnecting);
        assert!(connection.sync_state.is_none());
        connection.remove();
        assert_eq!(connection.state(), ConnectionState::Removed);
    }

    #[test]
    fn authenticate_requires_authenticating_state() {
        let mut connection = Connection::new(1);
        assert!(!connection.authenticate());
        connection.on_connected();
        assert!(connection.authenticate());
        assert!(!connection.authenticate());
    }
}
