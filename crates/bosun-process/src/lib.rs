use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Identity tag for one supervisor instance.
///
/// NOTE: This is exported into the environment of both the start and stop
/// commands so that concurrently running instances never target each other's
/// server process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ServerIdent(pub String);

impl ServerIdent {
    pub fn new(name: &str) -> Self {
        Self(format!("{name}-{}", uuid::Uuid::new_v4()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ServerState {
    Idle,
    Starting,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

/// Snapshot of a supervised server, safe to hand out to callers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServerStatus {
    pub ident: ServerIdent,
    pub state: ServerState,
    pub listening_port: u16,
    pub log_path: Option<PathBuf>,
    pub message: Option<String>,
}

/// One launch cycle: command line, chosen port, and when it began.
/// Immutable after creation; kept only for diagnostics.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LaunchAttempt {
    pub attempt: u32,
    pub port: u16,
    pub command: Vec<String>,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ident_embeds_name_and_is_unique() {
        let a = ServerIdent::new("warehouse");
        let b = ServerIdent::new("warehouse");
        assert!(a.0.starts_with("warehouse-"));
        assert_ne!(a, b);
    }
}
