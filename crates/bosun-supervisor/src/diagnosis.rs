use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::{
    io::AsyncWriteExt,
    sync::{Mutex, mpsc},
};

use crate::config::env_usize;

const DEFAULT_MAX_LINES: usize = 10_000;

fn max_lines() -> usize {
    env_usize("BOSUN_DIAG_MAX_LINES")
        .map(|v| v.clamp(100, 1_000_000))
        .unwrap_or(DEFAULT_MAX_LINES)
}

#[derive(Debug)]
struct DiagnosisBuffer {
    next_seq: u64,
    max_lines: usize,
    lines: VecDeque<(u64, String)>,
}

impl Default for DiagnosisBuffer {
    fn default() -> Self {
        Self {
            next_seq: 1,
            max_lines: max_lines(),
            lines: VecDeque::new(),
        }
    }
}

impl DiagnosisBuffer {
    fn push_line(&mut self, line: String) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        self.lines.push_back((seq, line));
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    fn tail_after(&self, cursor: u64, limit: usize) -> (Vec<String>, u64) {
        // cursor 0 is a convenience: return the most recent lines.
        if cursor == 0 {
            let start = self.lines.len().saturating_sub(limit);
            let mut out = Vec::new();
            let mut last = 0;
            for (seq, line) in self.lines.iter().skip(start) {
                out.push(line.clone());
                last = *seq;
            }
            return (out, last);
        }

        let mut out = Vec::new();
        let mut last = cursor;
        for (seq, line) in self.lines.iter() {
            if *seq > cursor {
                out.push(line.clone());
                last = *seq;
                if out.len() >= limit {
                    break;
                }
            }
        }
        (out, last)
    }

    fn snapshot(&self) -> Vec<String> {
        self.lines.iter().map(|(_, line)| line.clone()).collect()
    }
}

struct CaptureFileWriter {
    file: tokio::fs::File,
}

impl CaptureFileWriter {
    async fn open(path: PathBuf) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self { file })
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let mut line = line.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        self.file.write_all(line.as_bytes()).await
    }
}

/// Append-only record of everything the server and its bootstrap printed,
/// across every launch attempt, plus per-attempt headers.
///
/// Appends are line-atomic: a whole line goes in under one lock acquisition,
/// so concurrent writers can interleave lines but never merge them. Relative
/// order from a single writer is preserved; order across writers is not.
#[derive(Clone)]
pub struct DiagnosisSink {
    buffer: Arc<Mutex<DiagnosisBuffer>>,
    file_tx: Option<mpsc::UnboundedSender<String>>,
}

impl DiagnosisSink {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(DiagnosisBuffer::default())),
            file_tx: None,
        }
    }

    /// Mirrors every subsequent line into `<dir>/capture.log` via a writer
    /// task, so a postmortem survives the process. No-op if already enabled.
    pub(crate) fn enable_capture_file(&mut self, dir: &Path) {
        if self.file_tx.is_some() {
            return;
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let path = dir.join("capture.log");
        tokio::spawn(async move {
            let Ok(mut writer) = CaptureFileWriter::open(path).await else {
                return;
            };
            while let Some(line) = rx.recv().await {
                let _ = writer.write_line(&line).await;
            }
        });
        self.file_tx = Some(tx);
    }

    pub async fn emit(&self, line: impl Into<String>) {
        let line = line.into();
        self.buffer.lock().await.push_line(line.clone());
        if let Some(tx) = &self.file_tx {
            let _ = tx.send(line);
        }
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.buffer.lock().await.snapshot()
    }

    pub async fn tail_after(&self, cursor: u64, limit: usize) -> (Vec<String>, u64) {
        self.buffer.lock().await.tail_after(cursor, limit)
    }
}

impl Default for DiagnosisSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_preserves_order() {
        let sink = DiagnosisSink::new();
        sink.emit("first").await;
        sink.emit("second").await;
        sink.emit("third").await;
        assert_eq!(sink.snapshot().await, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn tail_after_resumes_from_cursor() {
        let sink = DiagnosisSink::new();
        for i in 0..5 {
            sink.emit(format!("line {i}")).await;
        }
        let (lines, cursor) = sink.tail_after(0, 2).await;
        assert_eq!(lines, vec!["line 3", "line 4"]);
        assert_eq!(cursor, 5);

        sink.emit("line 5").await;
        let (lines, cursor) = sink.tail_after(cursor, 10).await;
        assert_eq!(lines, vec!["line 5"]);
        assert_eq!(cursor, 6);
    }

    #[tokio::test]
    async fn concurrent_emitters_never_merge_lines() {
        let sink = DiagnosisSink::new();

        let a = {
            let sink = sink.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    sink.emit(format!("stream-a {i}")).await;
                }
            })
        };
        let b = {
            let sink = sink.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    sink.emit(format!("stream-b {i}")).await;
                }
            })
        };
        a.await.unwrap();
        b.await.unwrap();

        let lines = sink.snapshot().await;
        assert_eq!(lines.len(), 400);
        for line in &lines {
            assert!(
                line.starts_with("stream-a ") || line.starts_with("stream-b "),
                "merged or partial line: {line}"
            );
        }

        // Relative order within each stream survives the interleaving.
        for prefix in ["stream-a", "stream-b"] {
            let seen: Vec<usize> = lines
                .iter()
                .filter_map(|l| l.strip_prefix(prefix))
                .map(|n| n.trim().parse().unwrap())
                .collect();
            assert_eq!(seen, (0..200usize).collect::<Vec<_>>());
        }
    }
}
