use std::{collections::BTreeMap, path::PathBuf, time::Duration};

pub(crate) fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
}

pub(crate) fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse::<u64>().ok())
}

const DEFAULT_BASE_PORT: u16 = 10_000;
const DEFAULT_READY_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_STOP_GRACE_MS: u64 = 3_000;

fn base_port() -> u16 {
    env_u64("BOSUN_BASE_PORT")
        .map(|v| v.clamp(1024, 65_000) as u16)
        .unwrap_or(DEFAULT_BASE_PORT)
}

fn ready_timeout() -> Duration {
    Duration::from_millis(
        env_u64("BOSUN_READY_TIMEOUT_MS")
            .map(|v| v.clamp(1_000, 10 * 60 * 1000))
            .unwrap_or(DEFAULT_READY_TIMEOUT_MS),
    )
}

fn max_attempts() -> u32 {
    env_u64("BOSUN_MAX_ATTEMPTS")
        .map(|v| v.clamp(1, 10) as u32)
        .unwrap_or(DEFAULT_MAX_ATTEMPTS)
}

fn stop_grace() -> Duration {
    Duration::from_millis(
        env_u64("BOSUN_STOP_GRACE_MS")
            .map(|v| v.clamp(0, 60_000))
            .unwrap_or(DEFAULT_STOP_GRACE_MS),
    )
}

/// How to bring one server up and down.
///
/// Defaults consult clamped `BOSUN_*` environment overrides, so a test
/// machine can stretch timeouts without code changes.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Short name used for the identity tag and log lines.
    pub name: String,
    /// Bootstrap executable; it daemonizes the real server and exits.
    pub start_command: PathBuf,
    /// Executable that asks the daemonized server to shut down.
    pub stop_command: PathBuf,
    /// Value for the bootstrap's `--master` flag.
    pub master: String,
    /// Optional directory for the bootstrap's `--driver-class-path` flag.
    pub driver_class_path: Option<PathBuf>,
    /// First port to try; bumped by one after every failed attempt.
    pub base_port: u16,
    /// Protocol/version selector the server should speak.
    pub protocol: String,
    pub tls_enabled: bool,
    pub single_session: bool,
    pub gateway_enabled: bool,
    /// Caller `--conf key=value` overrides, appended after the fixed pairs.
    pub conf_overrides: BTreeMap<String, String>,
    /// Case-sensitive substrings that mark the server ready; any suffices.
    pub ready_markers: Vec<String>,
    /// How long one attempt may wait for a readiness marker.
    pub ready_timeout: Duration,
    pub max_attempts: u32,
    /// Approximate wait for the asynchronous stop command to take effect.
    pub stop_grace: Duration,
    /// Identity/pid directory for the server, attempt records and the
    /// capture file for us. `None` derives a unique one under the system
    /// temp dir so concurrent instances never collide.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            name: "server".to_string(),
            start_command: PathBuf::from("sbin/start-server.sh"),
            stop_command: PathBuf::from("sbin/stop-server.sh"),
            master: "local".to_string(),
            driver_class_path: None,
            base_port: base_port(),
            protocol: "binary".to_string(),
            tls_enabled: false,
            single_session: true,
            gateway_enabled: false,
            conf_overrides: BTreeMap::new(),
            ready_markers: vec![
                "Service listening on".to_string(),
                "Started service endpoint".to_string(),
            ],
            ready_timeout: ready_timeout(),
            max_attempts: max_attempts(),
            stop_grace: stop_grace(),
            scratch_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = SupervisorConfig::default();
        assert!(cfg.max_attempts >= 1);
        assert!(!cfg.ready_markers.is_empty());
        assert!(cfg.ready_timeout >= Duration::from_secs(1));
        assert!(cfg.base_port >= 1024);
    }
}
