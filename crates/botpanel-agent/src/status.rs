use botpanel_process::{BotState, LogEntry};
use serde::Serialize;

use crate::{files::FileStore, process_manager::BotManager, process_support::self_rss_bytes};

/// Entries included in a status snapshot.
pub const STATUS_LOG_ENTRIES: usize = 100;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub status: BotState,
    pub logs: Vec<LogEntry>,
    pub files_count: usize,
    /// Milliseconds; 0 unless running.
    pub uptime: u64,
    pub memory_usage: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_memory_usage: Option<u64>,
    pub node_version: String,
    pub available_node_versions: Vec<String>,
    pub platform: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_user: Option<String>,
}

/// Point-in-time view assembled from the manager, the file store and the log.
pub async fn snapshot(
    manager: &BotManager,
    files: &FileStore,
    current_user: Option<&str>,
) -> StatusSnapshot {
    let m = manager.snapshot().await;
    let bot_memory_usage = if m.state == BotState::Running {
        manager.bot_rss_bytes().await
    } else {
        None
    };

    StatusSnapshot {
        status: m.state,
        logs: manager.sink().recent(STATUS_LOG_ENTRIES),
        files_count: files.count_entries().await,
        uptime: m.uptime_ms,
        memory_usage: self_rss_bytes().await,
        bot_memory_usage,
        node_version: m.node_version,
        available_node_versions: manager.config().node_versions.clone(),
        platform: std::env::consts::OS,
        current_user: current_user.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AgentConfig, log_sink::LogSink};

    #[tokio::test]
    async fn idle_snapshot_reports_stopped_and_counts_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.js"), "").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();

        let sink = LogSink::new();
        let manager = BotManager::new(AgentConfig::new(dir.path()), sink.clone());
        let files = FileStore::new(dir.path(), sink.clone());
        for i in 0..150 {
            sink.info("system", format!("line {i}"));
        }

        let snap = snapshot(&manager, &files, Some("admin")).await;
        assert_eq!(snap.status, BotState::Stopped);
        assert_eq!(snap.uptime, 0);
        assert_eq!(snap.files_count, 2);
        assert_eq!(snap.logs.len(), STATUS_LOG_ENTRIES);
        assert_eq!(snap.logs.last().unwrap().message, "line 149");
        assert_eq!(snap.node_version, "18");
        assert!(snap.bot_memory_usage.is_none());

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["status"], "stopped");
        assert_eq!(json["filesCount"], 2);
        assert_eq!(json["currentUser"], "admin");
        assert!(json.get("botMemoryUsage").is_none());
    }

    #[tokio::test]
    async fn missing_root_counts_zero_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("absent");
        let sink = LogSink::new();
        let manager = BotManager::new(AgentConfig::new(&root), sink.clone());
        let files = FileStore::new(&root, sink);

        let snap = snapshot(&manager, &files, None).await;
        assert_eq!(snap.files_count, 0);
        assert!(snap.logs.is_empty());
    }
}
