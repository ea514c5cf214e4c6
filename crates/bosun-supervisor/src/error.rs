/// Why a launch attempt failed.
///
/// The retry loop converts every variant into a retry decision; once attempts
/// are exhausted, the *last* attempt's variant is returned to the caller
/// unchanged so tests can match on the kind.
#[derive(Debug, thiserror::Error)]
pub enum SuperviseError {
    /// The bootstrap process could not be spawned, or exited abnormally.
    #[error("server bootstrap failed: {reason}")]
    Launch { reason: String },

    /// Bootstrap output never announced where the server writes its log.
    #[error("bootstrap output contains no `{marker}` line")]
    LogDiscovery { marker: String },

    /// The server log showed no readiness marker within the deadline. The
    /// server may still be starting; cleanup is left to the caller's `stop`.
    #[error("server did not report ready within {waited_ms}ms")]
    ReadyTimeout { waited_ms: u64 },
}
