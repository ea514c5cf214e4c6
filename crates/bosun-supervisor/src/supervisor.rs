use std::path::{Path, PathBuf};
use std::sync::Arc;

use bosun_process::{LaunchAttempt, ServerIdent, ServerState, ServerStatus};
use chrono::Utc;
use tokio::process::Child;

use crate::capture::spawn_capture;
use crate::config::SupervisorConfig;
use crate::diagnosis::DiagnosisSink;
use crate::error::SuperviseError;
use crate::launcher;
use crate::readiness::{ReadySignal, ReadyWatcher};

/// Brings an external server up for a test run and tears it down afterward.
///
/// Startup success is only observable in the server's growing log, so each
/// attempt runs the bootstrap, finds the announced log file, tails it, and
/// waits for a readiness marker. A failed attempt is reclaimed with `stop`
/// and retried on the next port, up to the configured bound.
pub struct ServerSupervisor {
    config: SupervisorConfig,
    ident: ServerIdent,
    scratch_dir: PathBuf,
    diagnosis: DiagnosisSink,
    state: ServerState,
    listening_port: u16,
    log_path: Option<PathBuf>,
    tail: Option<Child>,
    message: Option<String>,
}

impl ServerSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let ident = ServerIdent::new(&config.name);
        let scratch_dir = config
            .scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(&ident.0));
        let listening_port = config.base_port;
        Self {
            config,
            ident,
            scratch_dir,
            diagnosis: DiagnosisSink::new(),
            state: ServerState::Idle,
            listening_port,
            log_path: None,
            tail: None,
            message: None,
        }
    }

    pub fn ident(&self) -> &ServerIdent {
        &self.ident
    }

    /// Port of the attempt that succeeded (or the one currently being tried).
    pub fn listening_port(&self) -> u16 {
        self.listening_port
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            ident: self.ident.clone(),
            state: self.state,
            listening_port: self.listening_port,
            log_path: self.log_path.clone(),
            message: self.message.clone(),
        }
    }

    /// Everything captured so far, across all attempts.
    pub async fn diagnosis_snapshot(&self) -> Vec<String> {
        self.diagnosis.snapshot().await
    }

    /// Launches the server, retrying with the next port on failure.
    ///
    /// On success the handle reflects the winning attempt's port and log
    /// path. After the last failed attempt the captured output is dumped at
    /// error level and that attempt's failure is returned unchanged.
    pub async fn start(&mut self) -> Result<(), SuperviseError> {
        self.diagnosis.enable_capture_file(&self.scratch_dir);

        let attempts = self.config.max_attempts.max(1);
        let mut port = self.config.base_port;
        let mut last_failure: Option<SuperviseError> = None;

        for attempt in 1..=attempts {
            match self.launch_attempt(attempt, port).await {
                Ok(()) => {
                    self.state = ServerState::Ready;
                    self.message = None;
                    tracing::info!(attempt, port, ident = %self.ident.0, "server is ready");
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(attempt, port, %err, "launch attempt failed");
                    self.diagnosis
                        .emit(format!("[bosun] attempt {attempt} failed: {err}"))
                        .await;
                    last_failure = Some(err);
                    // Reclaim whatever the failed attempt left behind before
                    // the next attempt takes the following port.
                    self.stop().await;
                    port = port.saturating_add(1);
                }
            }
        }

        self.state = ServerState::Failed;
        self.message = Some(format!("gave up after {attempts} attempts"));
        self.dump_diagnostics(attempts).await;
        Err(last_failure.unwrap_or(SuperviseError::Launch {
            reason: "no launch attempt was made".to_string(),
        }))
    }

    async fn launch_attempt(&mut self, attempt: u32, port: u16) -> Result<(), SuperviseError> {
        self.state = ServerState::Starting;
        self.listening_port = port;
        self.message = Some(format!("attempt {attempt}: waiting for readiness on port {port}"));

        let record = LaunchAttempt {
            attempt,
            port,
            command: launcher::start_command_line(&self.config, port),
            started_at: Utc::now(),
        };

        // Header first, so even a spawn failure leaves a trace.
        self.diagnosis
            .emit(format!(
                "[bosun] ===== attempt {attempt}: {} (port {port}) =====",
                record.command.join(" ")
            ))
            .await;
        if let Err(err) = launcher::write_attempt_record(&self.scratch_dir, &record).await {
            tracing::debug!(%err, "could not persist attempt record");
        }

        let env = launcher::command_env(&self.scratch_dir, &self.ident);
        let output = launcher::run_bootstrap(&record, &env, &self.diagnosis).await?;
        let log_path = launcher::discover_log_path(&output)?;

        let mut tail = launcher::spawn_tail(&log_path).await?;
        let signal = Arc::new(ReadySignal::new());
        let watcher = ReadyWatcher::new(
            self.diagnosis.clone(),
            self.config.ready_markers.clone(),
            signal.clone(),
        );
        if let Some(out) = tail.stdout.take() {
            spawn_capture(out, watcher.clone());
        }
        if let Some(err) = tail.stderr.take() {
            spawn_capture(err, watcher);
        }

        self.log_path = Some(log_path);
        self.tail = Some(tail);

        if signal.wait(self.config.ready_timeout).await {
            Ok(())
        } else {
            Err(SuperviseError::ReadyTimeout {
                waited_ms: self.config.ready_timeout.as_millis() as u64,
            })
        }
    }

    /// Asks the server to shut down, then reclaims local resources: the log
    /// file copy is deleted and the tail process killed. Never fails; a
    /// broken stop command is logged and cleanup proceeds anyway, and a
    /// second call (or one before any start) is a safe no-op.
    pub async fn stop(&mut self) {
        self.state = ServerState::Stopping;

        if let Err(err) =
            launcher::run_stop_command(&self.config, &self.scratch_dir, &self.ident).await
        {
            tracing::warn!(%err, "stop command failed; continuing with local cleanup");
        }
        // The stop command returns before the server is gone; give it a
        // moment rather than confirming the exit.
        tokio::time::sleep(self.config.stop_grace).await;

        if let Some(path) = self.log_path.take() {
            if let Err(err) = tokio::fs::remove_file(&path).await {
                tracing::debug!(path = %path.display(), %err, "could not remove server log");
            }
        }
        if let Some(mut tail) = self.tail.take() {
            if let Err(err) = tail.kill().await {
                tracing::debug!(%err, "could not kill tail process");
            }
        }

        self.state = ServerState::Stopped;
        self.message = None;
    }

    async fn dump_diagnostics(&self, attempts: u32) {
        let lines = self.diagnosis.snapshot().await;
        tracing::error!(
            attempts,
            ident = %self.ident.0,
            "server never became ready; dumping {} captured lines",
            lines.len()
        );
        for line in &lines {
            tracing::error!(target: "bosun::capture", "{line}");
        }
    }
}
