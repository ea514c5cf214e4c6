use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use bosun_supervisor::{ServerSupervisor, SupervisorConfig};

fn parse_markers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_conf_overrides(raw: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for pair in raw.split(',') {
        if let Some((key, value)) = pair.split_once('=') {
            out.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    out
}

fn config_from_env() -> anyhow::Result<SupervisorConfig> {
    let mut config = SupervisorConfig::default();

    config.start_command = std::env::var("BOSUN_START_CMD")
        .map(PathBuf::from)
        .context("BOSUN_START_CMD must point at the server start command")?;
    config.stop_command = std::env::var("BOSUN_STOP_CMD")
        .map(PathBuf::from)
        .context("BOSUN_STOP_CMD must point at the server stop command")?;

    if let Ok(v) = std::env::var("BOSUN_NAME") {
        config.name = v;
    }
    if let Ok(v) = std::env::var("BOSUN_MASTER") {
        config.master = v;
    }
    if let Ok(v) = std::env::var("BOSUN_DRIVER_CLASS_PATH") {
        config.driver_class_path = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("BOSUN_READY_MARKERS") {
        let markers = parse_markers(&v);
        if !markers.is_empty() {
            config.ready_markers = markers;
        }
    }
    if let Ok(v) = std::env::var("BOSUN_CONF") {
        config.conf_overrides = parse_conf_overrides(&v);
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = config_from_env()?;
    let mut supervisor = ServerSupervisor::new(config);
    supervisor.start().await?;

    let status = supervisor.status();
    let log = status
        .log_path
        .as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    tracing::info!(
        port = status.listening_port,
        ident = %status.ident.0,
        log = %log,
        "server is up; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    supervisor.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_are_split_and_trimmed() {
        assert_eq!(
            parse_markers("Service ready, listening on ,"),
            vec!["Service ready", "listening on"]
        );
        assert!(parse_markers("").is_empty());
    }

    #[test]
    fn conf_overrides_keep_values_with_equals_signs() {
        let conf = parse_conf_overrides("server.opts=-Xmx1g -Dx=y,server.workers=4");
        assert_eq!(conf["server.opts"], "-Xmx1g -Dx=y");
        assert_eq!(conf["server.workers"], "4");
    }
}
