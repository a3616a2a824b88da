//! Realtime endpoint resolution.

use std::fmt;

/// Default host used when no base URL is configured.
pub const DEFAULT_HOST: &str = "localhost";

/// Default service port used when no base URL is configured.
pub const DEFAULT_PORT: u16 = 8000;

/// Which stream to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// User-level updates: plans, status, agent messages for every task.
    User { user_id: String },
    /// Conversation stream for a single task.
    TaskMessages { task_id: String },
}

impl Endpoint {
    pub fn user(user_id: impl Into<String>) -> Self {
        Endpoint::User {
            user_id: user_id.into(),
        }
    }

    pub fn task(task_id: impl Into<String>) -> Self {
        Endpoint::TaskMessages {
            task_id: task_id.into(),
        }
    }

    /// Pick the task stream when a task id is given, otherwise the user stream.
    pub fn for_scope(user_id: Option<&str>, task_id: Option<&str>) -> Option<Self> {
        match (task_id, user_id) {
            (Some(task_id), _) => Some(Self::task(task_id)),
            (None, Some(user_id)) => Some(Self::user(user_id)),
            (None, None) => None,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            Endpoint::TaskMessages { task_id } => Some(task_id),
            Endpoint::User { .. } => None,
        }
    }

    /// Path below the base URL.
    pub fn path(&self) -> String {
        match self {
            Endpoint::User { user_id } => format!("/ws/{user_id}"),
            Endpoint::TaskMessages { task_id } => format!("/ws/tasks/{task_id}/messages"),
        }
    }

    /// Full URL below `base`.
    pub fn url(&self, base: &str) -> String {
        format!("{}{}", base.trim_end_matches('/'), self.path())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::User { user_id } => write!(f, "user:{user_id}"),
            Endpoint::TaskMessages { task_id } => write!(f, "task:{task_id}"),
        }
    }
}

/// Resolve the WebSocket base URL: an explicit base wins, otherwise
/// `ws://{host}:{port}`.
pub fn resolve_base_url(base_url: Option<&str>, host: &str, port: u16) -> String {
    match base_url.map(str::trim).filter(|b| !b.is_empty()) {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => format!("ws://{host}:{port}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_url() {
        let endpoint = Endpoint::user("u-42");
        assert_eq!(endpoint.url("ws://api.example.com"), "ws://api.example.com/ws/u-42");
    }

    #[test]
    fn test_task_url_trims_trailing_slash() {
        let endpoint = Endpoint::task("t-7");
        assert_eq!(
            endpoint.url("wss://api.example.com/"),
            "wss://api.example.com/ws/tasks/t-7/messages"
        );
    }

    #[test]
    fn test_task_scope_wins() {
        assert_eq!(
            Endpoint::for_scope(Some("u1"), Some("t1")),
            Some(Endpoint::task("t1"))
        );
        assert_eq!(
            Endpoint::for_scope(Some("u1"), None),
            Some(Endpoint::user("u1"))
        );
        assert_eq!(Endpoint::for_scope(None, None), None);
    }

    #[test]
    fn test_base_url_fallback() {
        assert_eq!(
            resolve_base_url(None, DEFAULT_HOST, DEFAULT_PORT),
            "ws://localhost:8000"
        );
        assert_eq!(
            resolve_base_url(Some("  "), "10.0.0.5", 9000),
            "ws://10.0.0.5:9000"
        );
        assert_eq!(
            resolve_base_url(Some("wss://helios.example.com/"), DEFAULT_HOST, DEFAULT_PORT),
            "wss://helios.example.com"
        );
    }
}
