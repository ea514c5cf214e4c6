//! Supervisor for an external server whose startup can only be observed in
//! its log output.
//!
//! The bootstrap command daemonizes the real server and exits, announcing the
//! server's log path on the way out. The supervisor tails that log, watches
//! for a readiness marker, retries on the next port when an attempt fails,
//! and keeps every captured line for postmortem reporting.

mod capture;
mod config;
mod diagnosis;
mod error;
mod launcher;
mod readiness;
mod supervisor;

pub use config::SupervisorConfig;
pub use diagnosis::DiagnosisSink;
pub use error::SuperviseError;
pub use readiness::{ReadySignal, ReadyWatcher};
pub use supervisor::ServerSupervisor;
