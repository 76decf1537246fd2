use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use botpanel_process::{LogEntry, Severity};
use tokio::{io::AsyncWriteExt, sync::mpsc};

use crate::config::LogFileConfig;

pub const MAX_LOG_ENTRIES: usize = 500;
pub const MAX_MESSAGE_CHARS: usize = 1000;

#[derive(Debug)]
struct LogBuffer {
    max_entries: usize,
    entries: VecDeque<LogEntry>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self {
            max_entries: MAX_LOG_ENTRIES,
            entries: VecDeque::with_capacity(MAX_LOG_ENTRIES + 1),
        }
    }
}

impl LogBuffer {
    fn push(&mut self, entry: LogEntry) {
        self.entries.push_back(entry);
        // FIFO eviction: the oldest line goes first.
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    fn tail(&self, limit: usize) -> Vec<LogEntry> {
        let start = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(start).cloned().collect()
    }
}

/// Bounded, append-only panel log shared by every component.
///
/// The lock is never held across an await, so appends are safe from
/// blocking tasks (archive extraction) as well as async ones.
#[derive(Clone, Debug, Default)]
pub struct LogSink {
    buffer: Arc<Mutex<LogBuffer>>,
    file_tx: Option<mpsc::UnboundedSender<String>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Like [`LogSink::new`], but every entry is also appended to a rotating file.
    ///
    /// Must be called inside a tokio runtime.
    pub fn with_log_file(cfg: LogFileConfig) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let path = cfg.path.clone();
            let mut writer = match FileLogWriter::open(cfg.path, cfg.max_bytes, cfg.max_files).await
            {
                Ok(w) => w,
                Err(err) => {
                    tracing::warn!(%err, path = %path.display(), "panel log file disabled");
                    return;
                }
            };
            while let Some(line) = rx.recv().await {
                let _ = writer.write_line(&line).await;
            }
        });
        Self {
            buffer: Arc::default(),
            file_tx: Some(tx),
        }
    }

    pub fn append(&self, message: impl AsRef<str>, severity: Severity, actor: &str) {
        let entry = self.record(message.as_ref(), severity, actor);
        self.lock().push(entry);
    }

    /// Builds the entry and mirrors it to tracing and the log file.
    fn record(&self, message: &str, severity: Severity, actor: &str) -> LogEntry {
        let entry = LogEntry {
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
            message: message.chars().take(MAX_MESSAGE_CHARS).collect(),
            severity,
            actor: actor.to_string(),
        };

        mirror(&entry);
        if let Some(tx) = &self.file_tx {
            let _ = tx.send(format!(
                "[{}] [{}] [{}] {}",
                entry.timestamp,
                entry.severity.as_str().to_ascii_uppercase(),
                entry.actor,
                entry.message
            ));
        }
        entry
    }

    pub fn info(&self, actor: &str, message: impl AsRef<str>) {
        self.append(message, Severity::Info, actor);
    }

    pub fn success(&self, actor: &str, message: impl AsRef<str>) {
        self.append(message, Severity::Success, actor);
    }

    pub fn warning(&self, actor: &str, message: impl AsRef<str>) {
        self.append(message, Severity::Warning, actor);
    }

    pub fn error(&self, actor: &str, message: impl AsRef<str>) {
        self.append(message, Severity::Error, actor);
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        self.lock().tail(n)
    }

    /// Empties the buffer, leaving only the audit entry for the clear itself.
    pub fn clear(&self, actor: &str) {
        let entry = self.record("Logs cleared", Severity::Warning, actor);
        let mut buf = self.lock();
        buf.entries.clear();
        buf.push(entry);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogBuffer> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn mirror(entry: &LogEntry) {
    let actor = entry.actor.as_str();
    let message = entry.message.as_str();
    match entry.severity {
        Severity::Info => tracing::info!(actor, "{message}"),
        Severity::Success => tracing::info!(actor, success = true, "{message}"),
        Severity::Warning => tracing::warn!(actor, "{message}"),
        Severity::Error => tracing::error!(actor, "{message}"),
    }
}

struct FileLogWriter {
    path: PathBuf,
    max_bytes: u64,
    max_files: usize,
    bytes: u64,
    file: tokio::fs::File,
}

impl FileLogWriter {
    async fn open(path: PathBuf, max_bytes: u64, max_files: usize) -> std::io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            max_bytes,
            max_files,
            bytes,
            file,
        })
    }

    fn rotated(&self, n: usize) -> PathBuf {
        PathBuf::from(format!("{}.{n}", self.path.display()))
    }

    async fn rotate(&mut self) -> std::io::Result<()> {
        let _ = self.file.flush().await;

        // .(n-1) -> .n, oldest falls off the end.
        for i in (1..self.max_files).rev() {
            let from = self.rotated(i);
            if tokio::fs::metadata(&from).await.is_ok() {
                let _ = tokio::fs::rename(&from, self.rotated(i + 1)).await;
            }
        }
        if tokio::fs::metadata(&self.path).await.is_ok() {
            let _ = tokio::fs::rename(&self.path, self.rotated(1)).await;
        }

        self.file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        self.bytes = 0;
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let mut line = line.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }

        let write_len = line.len() as u64;
        if self.max_bytes > 0 && self.bytes.saturating_add(write_len) > self.max_bytes {
            self.rotate().await.ok();
        }

        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        self.bytes = self.bytes.saturating_add(write_len);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_at_500_evicting_oldest() {
        let sink = LogSink::new();
        for i in 0..=MAX_LOG_ENTRIES {
            sink.info("system", format!("line {i}"));
        }
        assert_eq!(sink.len(), MAX_LOG_ENTRIES);

        let all = sink.recent(usize::MAX);
        assert_eq!(all.first().unwrap().message, "line 1");
        assert_eq!(all.last().unwrap().message, "line 500");
        assert!(all.iter().all(|e| e.message != "line 0"));
    }

    #[test]
    fn recent_returns_tail_in_insertion_order() {
        let sink = LogSink::new();
        for i in 0..10 {
            sink.info("system", format!("{i}"));
        }
        let tail: Vec<String> = sink.recent(3).into_iter().map(|e| e.message).collect();
        assert_eq!(tail, vec!["7", "8", "9"]);
        assert_eq!(sink.len(), 10);
    }

    #[test]
    fn messages_are_capped_by_characters() {
        let sink = LogSink::new();
        sink.error("bot", "é".repeat(MAX_MESSAGE_CHARS + 50));
        let e = sink.recent(1).remove(0);
        assert_eq!(e.message.chars().count(), MAX_MESSAGE_CHARS);
        assert_eq!(e.severity, Severity::Error);
        assert_eq!(e.actor, "bot");
        assert_eq!(e.timestamp.len(), "00:00:00".len());
    }

    #[test]
    fn clear_leaves_one_entry_by_clearing_actor() {
        let sink = LogSink::new();
        sink.info("system", "a");
        sink.info("system", "b");
        sink.clear("alice");

        let all = sink.recent(100);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].message, "Logs cleared");
        assert_eq!(all[0].actor, "alice");
        assert_eq!(all[0].severity, Severity::Warning);
    }

    #[test]
    fn clear_entry_is_never_preceded_by_concurrent_appends() {
        let sink = LogSink::new();
        let writer = {
            let sink = sink.clone();
            std::thread::spawn(move || {
                for i in 0..20_000 {
                    sink.info("bot", format!("line {i}"));
                }
            })
        };

        for _ in 0..200 {
            sink.clear("alice");
            let all = sink.recent(usize::MAX);
            if let Some(pos) = all.iter().position(|e| e.message == "Logs cleared") {
                assert_eq!(pos, 0, "appended before the clear entry: {:?}", all[0]);
            }
        }
        writer.join().unwrap();
    }

    #[tokio::test]
    async fn file_writer_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("panel.log");
        let mut w = FileLogWriter::open(path.clone(), 32, 2).await.unwrap();

        w.write_line("aaaaaaaaaaaaaaaaaaaa").await.unwrap();
        w.write_line("bbbbbbbbbbbbbbbbbbbb").await.unwrap();
        w.write_line("cccccccccccccccccccc").await.unwrap();

        let current = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(current, "cccccccccccccccccccc\n");
        let first = tokio::fs::read_to_string(dir.path().join("logs/panel.log.1"))
            .await
            .unwrap();
        assert_eq!(first, "bbbbbbbbbbbbbbbbbbbb\n");
        let second = tokio::fs::read_to_string(dir.path().join("logs/panel.log.2"))
            .await
            .unwrap();
        assert_eq!(second, "aaaaaaaaaaaaaaaaaaaa\n");
    }

    #[tokio::test]
    async fn sink_forwards_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.log");
        let sink = LogSink::with_log_file(LogFileConfig {
            path: path.clone(),
            max_bytes: 1024 * 1024,
            max_files: 2,
        });
        sink.warning("alice", "disk almost full");

        let mut content = String::new();
        for _ in 0..50 {
            content = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            if !content.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(content.contains("[WARNING] [alice] disk almost full"));
        assert_eq!(sink.len(), 1);
    }
}
