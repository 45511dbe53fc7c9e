//! Routing statistics.
//!
//! [`StatsRecorder`] appends one `category,model_id` line per routed request.
//! Records travel over a channel to a single writer task that owns the file,
//! so callers never wait on disk I/O and lines never interleave.
//! [`StatsSummary`] reads the log back for reporting.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::types::TaskCategory;

/// Number of most recent records kept in a summary.
const RECENT_LIMIT: usize = 10;

enum Command {
    Append(String),
    Flush(oneshot::Sender<()>),
}

// ---------------------------------------------------------------------------
// StatsRecorder
// ---------------------------------------------------------------------------

/// Best-effort, append-only recorder of routing outcomes.
pub struct StatsRecorder {
    tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl StatsRecorder {
    /// Open (creating if needed) the log at `path` and start the writer task.
    /// Must be called from within a tokio runtime.
    pub fn start(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create stats directory: {}", parent.display())
                })?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open stats log: {}", path.display()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(tokio::fs::File::from_std(file), path.clone(), rx));
        info!(path = %path.display(), "Stats recorder started");

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// A recorder that drops every record.
    pub fn disabled() -> Self {
        Self {
            tx: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.lock().is_some()
    }

    /// Queue one record. Returns immediately; write failures are logged.
    pub fn record(&self, category: TaskCategory, model_id: &str) {
        if model_id.is_empty() || model_id.contains([',', '\n', '\r']) {
            warn!(model = model_id, "Skipping stats record with unusable model id");
            return;
        }
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else { return };
        if tx.send(Command::Append(format!("{category},{model_id}\n"))).is_err() {
            warn!(model = model_id, "Stats writer has stopped; record dropped");
        }
    }

    /// Wait until every record queued so far has been written.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        let sent = match self.tx.lock().as_ref() {
            Some(tx) => tx.send(Command::Flush(done_tx)).is_ok(),
            None => false,
        };
        if sent {
            let _ = done_rx.await;
        }
    }

    /// Stop accepting records, drain the queue and close the file.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().take());
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "Stats writer task failed");
            }
        }
    }
}

async fn run_writer(
    mut file: tokio::fs::File,
    path: PathBuf,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Append(line) => {
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    warn!(path = %path.display(), error = %e, "Failed to write stats record");
                    continue;
                }
                if let Err(e) = file.flush().await {
                    warn!(path = %path.display(), error = %e, "Failed to flush stats log");
                }
                debug!(record = line.trim_end(), "Stats recorded");
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    if let Err(e) = file.sync_all().await {
        warn!(path = %path.display(), error = %e, "Failed to sync stats log");
    }
    debug!(path = %path.display(), "Stats writer stopped");
}

// ---------------------------------------------------------------------------
// StatsSummary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsRecord {
    pub category: String,
    pub model_id: String,
}

impl StatsRecord {
    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim().split(',');
        let (category, model_id) = (parts.next()?, parts.next()?);
        if parts.next().is_some() || category.is_empty() || model_id.is_empty() {
            return None;
        }
        Some(Self {
            category: category.to_owned(),
            model_id: model_id.to_owned(),
        })
    }
}

/// Aggregate view over a stats log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSummary {
    pub total: usize,
    /// Alphabetical by category.
    pub by_category: Vec<(String, usize)>,
    /// Most frequent model first.
    pub by_model: Vec<(String, usize)>,
    /// Up to the last ten records, oldest first.
    pub recent: Vec<StatsRecord>,
    /// Lines that were not `category,model_id`.
    pub skipped: usize,
}

impl StatsSummary {
    /// Read the log at `path`. A missing file yields an empty summary.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read stats log: {}", path.display()))
            }
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut records = Vec::new();
        let mut skipped = 0;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match StatsRecord::parse(line) {
                Some(record) => records.push(record),
                None => skipped += 1,
            }
        }

        let mut categories: BTreeMap<&str, usize> = BTreeMap::new();
        let mut models: BTreeMap<&str, usize> = BTreeMap::new();
        for r in &records {
            *categories.entry(&r.category).or_default() += 1;
            *models.entry(&r.model_id).or_default() += 1;
        }

        let mut by_model: Vec<(String, usize)> =
            models.into_iter().map(|(m, n)| (m.to_owned(), n)).collect();
        // Stable: equal counts stay alphabetical.
        by_model.sort_by(|a, b| b.1.cmp(&a.1));

        Self {
            total: records.len(),
            by_category: categories
                .into_iter()
                .map(|(c, n)| (c.to_owned(), n))
                .collect(),
            by_model,
            recent: records[records.len().saturating_sub(RECENT_LIMIT)..].to_vec(),
            skipped,
        }
    }
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total == 0 {
            return writeln!(f, "No statistics recorded yet.");
        }
        let pct = |n: usize| n as f64 * 100.0 / self.total as f64;

        writeln!(f, "Total requests: {}", self.total)?;
        writeln!(f, "\nTask categories:")?;
        for (category, n) in &self.by_category {
            writeln!(f, "  {category}: {n} ({:.1}%)", pct(*n))?;
        }
        writeln!(f, "\nModel selection:")?;
        for (model, n) in &self.by_model {
            writeln!(f, "  {model}: {n} ({:.1}%)", pct(*n))?;
        }
        writeln!(f, "\nRecent entries (last {}):", self.recent.len())?;
        for r in &self.recent {
            writeln!(f, "  - {} -> {}", r.category, r.model_id)?;
        }
        if self.skipped > 0 {
            writeln!(f, "\n({} malformed lines skipped)", self.skipped)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn records_are_appended_as_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stats").join("log.txt");
        let recorder = StatsRecorder::start(&path).unwrap();

        recorder.record(TaskCategory::Coding, "claude-opus");
        recorder.record(TaskCategory::Simple, "gpt-4o-mini");
        recorder.shutdown().await;

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "coding,claude-opus\nsimple,gpt-4o-mini\n");
    }

    #[tokio::test]
    async fn existing_log_is_appended_not_truncated() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log.txt");
        std::fs::write(&path, "general,gpt-4o\n").unwrap();

        let recorder = StatsRecorder::start(&path).unwrap();
        recorder.record(TaskCategory::Analysis, "o3");
        recorder.flush().await;

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "general,gpt-4o\nanalysis,o3\n");
        recorder.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_records_never_interleave() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log.txt");
        let recorder = Arc::new(StatsRecorder::start(&path).unwrap());

        let mut handles = Vec::new();
        for i in 0..20 {
            let recorder = Arc::clone(&recorder);
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    recorder.record(TaskCategory::ALL[i % 6], &format!("model-{i}"));
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        recorder.shutdown().await;

        let summary = StatsSummary::load(&path).unwrap();
        assert_eq!(summary.total, 200);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.by_model.len(), 20);
    }

    #[tokio::test]
    async fn unusable_ids_and_post_shutdown_records_are_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log.txt");
        let recorder = StatsRecorder::start(&path).unwrap();

        recorder.record(TaskCategory::Coding, "a,b");
        recorder.record(TaskCategory::Coding, "");
        recorder.shutdown().await;
        recorder.record(TaskCategory::Coding, "late");
        assert!(!recorder.is_enabled());

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn disabled_recorder_is_inert() {
        let recorder = StatsRecorder::disabled();
        recorder.record(TaskCategory::General, "gpt-4o");
        recorder.flush().await;
        recorder.shutdown().await;
        assert!(!recorder.is_enabled());
    }

    #[test]
    fn start_fails_on_unwritable_path() {
        let tmp = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let _guard = rt.enter();
        assert!(StatsRecorder::start(tmp.path()).is_err());
    }

    #[test]
    fn summary_counts_and_orders() {
        let content = "coding,claude\nsimple,mini\ncoding,claude\n\nbroken line\nanalysis,o3,extra\ncoding,o3\n";
        let summary = StatsSummary::parse(content);

        assert_eq!(summary.total, 4);
        assert_eq!(summary.skipped, 2);
        assert_eq!(
            summary.by_category,
            [("coding".to_owned(), 3), ("simple".to_owned(), 1)]
        );
        assert_eq!(summary.by_model[0], ("claude".to_owned(), 2));
        // Equal counts fall back to alphabetical order.
        assert_eq!(summary.by_model[1].0, "mini");
        assert_eq!(summary.by_model[2].0, "o3");
    }

    #[test]
    fn summary_keeps_last_ten() {
        let content: String = (0..25).map(|i| format!("general,m{i}\n")).collect();
        let summary = StatsSummary::parse(&content);
        assert_eq!(summary.recent.len(), 10);
        assert_eq!(summary.recent[0].model_id, "m15");
        assert_eq!(summary.recent[9].model_id, "m24");
    }

    #[test]
    fn missing_log_is_empty_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let summary = StatsSummary::load(&tmp.path().join("none.txt")).unwrap();
        assert_eq!(summary, StatsSummary::default());
        assert_eq!(summary.to_string(), "No statistics recorded yet.\n");
    }

    #[test]
    fn report_shows_percentages() {
        let summary = StatsSummary::parse("coding,a\ncoding,b\ncreative,a\nsimple,a\n");
        let report = summary.to_string();
        assert!(report.contains("Total requests: 4"));
        assert!(report.contains("coding: 2 (50.0%)"));
        assert!(report.contains("a: 3 (75.0%)"));
        assert!(report.contains("  - simple -> a"));
    }
}
