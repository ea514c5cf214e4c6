use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use bosun_process::{LaunchAttempt, ServerIdent};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use crate::config::SupervisorConfig;
use crate::diagnosis::DiagnosisSink;
use crate::error::SuperviseError;

/// Prefix the bootstrap prints in front of the daemonized server's log path.
pub(crate) const LOG_PATH_MARKER: &str = "logging to ";

// Environment contract shared by the start and stop commands. The identity
// string scopes the stop command to this instance's server process; the pid
// dir keeps concurrent instances out of each other's way.
const ENV_TEST_MODE: &str = "SERVER_TESTING";
const ENV_HARNESS_MODE: &str = "SERVER_HARNESS_TESTING";
const ENV_PID_DIR: &str = "SERVER_PID_DIR";
const ENV_IDENT_STRING: &str = "SERVER_IDENT_STRING";

const CONF_PORT: &str = "server.port";
const CONF_PROTOCOL: &str = "server.protocol";
const CONF_TLS_ENABLED: &str = "server.tls.enabled";
const CONF_SINGLE_SESSION: &str = "server.session.single";
const CONF_GATEWAY_ENABLED: &str = "server.gateway.enabled";

/// Full command line for one attempt: executable, `--master`, optional
/// `--driver-class-path`, the fixed `--conf` pairs, then caller overrides.
pub(crate) fn start_command_line(cfg: &SupervisorConfig, port: u16) -> Vec<String> {
    let mut cmd = vec![cfg.start_command.display().to_string()];
    cmd.push("--master".to_string());
    cmd.push(cfg.master.clone());
    if let Some(dir) = &cfg.driver_class_path {
        cmd.push("--driver-class-path".to_string());
        cmd.push(dir.display().to_string());
    }

    let mut conf = |key: &str, value: String| {
        cmd.push("--conf".to_string());
        cmd.push(format!("{key}={value}"));
    };
    conf(CONF_PORT, port.to_string());
    conf(CONF_PROTOCOL, cfg.protocol.clone());
    conf(CONF_TLS_ENABLED, cfg.tls_enabled.to_string());
    conf(CONF_SINGLE_SESSION, cfg.single_session.to_string());
    conf(CONF_GATEWAY_ENABLED, cfg.gateway_enabled.to_string());
    for (key, value) in &cfg.conf_overrides {
        conf(key.as_str(), value.clone());
    }

    cmd
}

pub(crate) fn command_env(scratch_dir: &Path, ident: &ServerIdent) -> Vec<(String, String)> {
    vec![
        (ENV_TEST_MODE.to_string(), "0".to_string()),
        (ENV_HARNESS_MODE.to_string(), "1".to_string()),
        (ENV_PID_DIR.to_string(), scratch_dir.display().to_string()),
        (ENV_IDENT_STRING.to_string(), ident.0.clone()),
    ]
}

/// Runs the bootstrap to completion and returns its combined stdout+stderr.
/// The bootstrap daemonizes the real server and exits quickly, so waiting
/// synchronously is safe. Output lines are folded into the diagnosis buffer
/// whether the bootstrap succeeds or not.
pub(crate) async fn run_bootstrap(
    attempt: &LaunchAttempt,
    env: &[(String, String)],
    sink: &DiagnosisSink,
) -> Result<String, SuperviseError> {
    let Some((program, args)) = attempt.command.split_first() else {
        return Err(SuperviseError::Launch {
            reason: "empty start command".to_string(),
        });
    };

    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    for (key, value) in env {
        cmd.env(key, value);
    }

    let out = cmd.output().await.map_err(|e| SuperviseError::Launch {
        reason: format!("spawn {program}: {e}"),
    })?;

    let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&out.stderr));
    for line in text.lines() {
        sink.emit(line).await;
    }

    if !out.status.success() {
        return Err(SuperviseError::Launch {
            reason: format!("bootstrap exited with {}", out.status),
        });
    }
    Ok(text)
}

/// Finds the `logging to <path>` announcement in bootstrap output; the
/// remainder of the first matching line is the server's log path.
pub(crate) fn discover_log_path(bootstrap_output: &str) -> Result<PathBuf, SuperviseError> {
    for line in bootstrap_output.lines() {
        if let Some(idx) = line.find(LOG_PATH_MARKER) {
            let path = line[idx + LOG_PATH_MARKER.len()..].trim();
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
    }
    Err(SuperviseError::LogDiscovery {
        marker: LOG_PATH_MARKER.trim_end().to_string(),
    })
}

/// Follows the server log from its first byte. The server creates the file
/// lazily, so an empty one is put in place first; otherwise tail itself can
/// fail to start.
pub(crate) async fn spawn_tail(log_path: &Path) -> Result<Child, SuperviseError> {
    if let Some(parent) = log_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await
        .map_err(|e| SuperviseError::Launch {
            reason: format!("create log file {}: {e}", log_path.display()),
        })?;

    let mut cmd = Command::new("tail");
    cmd.arg("-n")
        .arg("+0")
        .arg("-f")
        .arg(log_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd.spawn().map_err(|e| SuperviseError::Launch {
        reason: format!("spawn tail for {}: {e}", log_path.display()),
    })
}

/// Stop command scoped to this instance via the identity environment. The
/// caller logs failures and proceeds with local cleanup regardless.
pub(crate) async fn run_stop_command(
    cfg: &SupervisorConfig,
    scratch_dir: &Path,
    ident: &ServerIdent,
) -> anyhow::Result<()> {
    let mut cmd = Command::new(&cfg.stop_command);
    cmd.stdin(Stdio::null());
    for (key, value) in command_env(scratch_dir, ident) {
        cmd.env(key, value);
    }
    let out = cmd
        .output()
        .await
        .with_context(|| format!("spawn {}", cfg.stop_command.display()))?;
    if !out.status.success() {
        anyhow::bail!("stop command exited with {}", out.status);
    }
    Ok(())
}

/// Persists the attempt record under the scratch dir (tmp + rename).
pub(crate) async fn write_attempt_record(
    dir: &Path,
    attempt: &LaunchAttempt,
) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .context("create scratch dir")?;
    let path = dir.join(format!("attempt-{}.json", attempt.attempt));
    let tmp = dir.join(format!("attempt-{}.json.tmp", attempt.attempt));
    let data = serde_json::to_vec_pretty(attempt).context("serialize attempt record")?;
    let mut f = tokio::fs::File::create(&tmp)
        .await
        .context("create attempt record")?;
    f.write_all(&data).await.context("write attempt record")?;
    f.flush().await.ok();
    tokio::fs::rename(&tmp, &path)
        .await
        .context("persist attempt record")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            start_command: PathBuf::from("/srv/bin/start-server.sh"),
            master: "local".to_string(),
            ..SupervisorConfig::default()
        }
    }

    #[test]
    fn command_line_has_fixed_conf_pairs() {
        let cmd = start_command_line(&config(), 4321);
        assert_eq!(cmd[0], "/srv/bin/start-server.sh");
        assert_eq!(cmd[1..3], ["--master".to_string(), "local".to_string()]);
        assert!(cmd.contains(&"server.port=4321".to_string()));
        assert!(cmd.contains(&"server.protocol=binary".to_string()));
        assert!(cmd.contains(&"server.tls.enabled=false".to_string()));
        assert!(cmd.contains(&"server.session.single=true".to_string()));
        assert!(cmd.contains(&"server.gateway.enabled=false".to_string()));
    }

    #[test]
    fn command_line_appends_overrides_last() {
        let mut cfg = config();
        cfg.conf_overrides
            .insert("server.worker.threads".to_string(), "4".to_string());
        let cmd = start_command_line(&cfg, 4321);
        assert_eq!(cmd.last().unwrap(), "server.worker.threads=4");
    }

    #[test]
    fn command_line_includes_driver_class_path_when_set() {
        let mut cfg = config();
        cfg.driver_class_path = Some(PathBuf::from("/srv/lib"));
        let cmd = start_command_line(&cfg, 4321);
        let idx = cmd
            .iter()
            .position(|a| a == "--driver-class-path")
            .unwrap();
        assert_eq!(cmd[idx + 1], "/srv/lib");
    }

    #[test]
    fn discover_log_path_takes_line_remainder() {
        let out = "starting test-server, logging to /tmp/ts/server.log\nmore output\n";
        assert_eq!(
            discover_log_path(out).unwrap(),
            PathBuf::from("/tmp/ts/server.log")
        );
    }

    #[test]
    fn discover_log_path_trims_whitespace() {
        let out = "logging to /tmp/a.log \r";
        assert_eq!(discover_log_path(out).unwrap(), PathBuf::from("/tmp/a.log"));
    }

    #[test]
    fn discover_log_path_fails_without_marker() {
        let err = discover_log_path("nothing useful here\n").unwrap_err();
        assert!(matches!(err, SuperviseError::LogDiscovery { .. }));
    }

    #[test]
    fn command_env_carries_identity() {
        let ident = ServerIdent::new("test-server");
        let env = command_env(Path::new("/tmp/scratch"), &ident);
        assert!(env.contains(&("SERVER_TESTING".to_string(), "0".to_string())));
        assert!(env.contains(&("SERVER_HARNESS_TESTING".to_string(), "1".to_string())));
        assert!(env.contains(&("SERVER_PID_DIR".to_string(), "/tmp/scratch".to_string())));
        assert!(
            env.iter()
                .any(|(k, v)| k == "SERVER_IDENT_STRING" && *v == ident.0)
        );
    }
}
