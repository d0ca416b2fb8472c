//! Read-only status of the relay.

use serde::Serialize;

use crate::registry::ConnectionRegistry;
use crate::Identity;

/// Status reported while the relay is serving.
pub const STATUS_RUNNING: &str = "running";

/// Point-in-time view of who is online.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    pub status: &'static str,
    pub active_users: Vec<Identity>,
    pub total_connections: usize,
}

impl RelayStatus {
    /// Build the status from a single registry snapshot.
    pub fn from_registry(registry: &ConnectionRegistry) -> Self {
        let active_users = registry.snapshot();
        Self {
            status: STATUS_RUNNING,
            total_connections: active_users.len(),
            active_users,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionHandle;
    use serde_json::json;

    #[test]
    fn test_status_of_empty_registry() {
        let registry = ConnectionRegistry::new();
        let status = RelayStatus::from_registry(&registry);
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"status": "running", "active_users": [], "total_connections": 0})
        );
    }

    #[test]
    fn test_status_tracks_registry() {
        let registry = ConnectionRegistry::new();
        let (alice, _a) = ConnectionHandle::channel(Identity::new("alice").unwrap(), 4);
        let (bob, _b) = ConnectionHandle::channel(Identity::new("bob").unwrap(), 4);
        registry.register(alice);
        registry.register(bob.clone());

        let status = RelayStatus::from_registry(&registry);
        assert_eq!(status.total_connections, 2);
        assert_eq!(
            serde_json::to_value(&status).unwrap()["active_users"],
            json!(["alice", "bob"])
        );

        registry.unregister("bob", bob.id());
        let status = RelayStatus::from_registry(&registry);
        assert_eq!(status.active_users, vec![Identity::new("alice").unwrap()]);
        assert_eq!(status.total_connections, 1);
    }
}
