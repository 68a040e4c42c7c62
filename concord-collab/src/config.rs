/// Session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Acting user of every document opened in the session
    pub user_name: String,
    /// Base WebSocket URL; the document id is appended as the last segment
    pub server_url: String,
    /// Registry lifecycle event channel capacity
    pub event_capacity: usize,
    /// Changes held per client while disconnected
    pub offline_queue_capacity: usize,
}

impl SessionConfig {
    pub fn for_user(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_name: "anonymous".to_string(),
            server_url: "ws://127.0.0.1:8080".to_string(),
            event_capacity: 64,
            offline_queue_capacity: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.user_name, "anonymous");
        assert_eq!(config.server_url, "ws://127.0.0.1:8080");
        assert_eq!(config.event_capacity, 64);
        assert_eq!(config.offline_queue_capacity, 10_000);
    }

    #[test]
    fn test_for_user_keeps_defaults() {
        let config = SessionConfig::for_user("alice");
        assert_eq!(config.user_name, "alice");
        assert_eq!(config.event_capacity, 64);
    }
}
