use std::{path::PathBuf, time::Duration};

const DEFAULT_FILES_ROOT: &str = "./home";
const DEFAULT_NODE_VERSIONS: &[&str] = &["18", "19", "20", "21"];
const DEFAULT_NODE_VERSION: &str = "18";
const DEFAULT_INSTALL_TIMEOUT_SEC: u64 = 600;
const DEFAULT_STOP_GRACE_SEC: u64 = 5;
const DEFAULT_LOG_FILE_MAX_BYTES: u64 = 10 * 1024 * 1024; // 10 MiB
const DEFAULT_LOG_FILE_MAX_FILES: usize = 3;

pub const ENTRY_FILE_CANDIDATES: &[&str] = &["index.js", "bot.js", "main.js", "app.js"];
pub const MANIFEST_FILE: &str = "package.json";
pub const CREDENTIAL_FILE: &str = ".env";

pub(crate) fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
}

pub(crate) fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Where the persistent panel log goes, if anywhere.
#[derive(Debug, Clone)]
pub struct LogFileConfig {
    pub path: PathBuf,
    pub max_bytes: u64,
    pub max_files: usize,
}

impl LogFileConfig {
    pub fn from_env() -> Option<Self> {
        let path = env_string("BOTPANEL_LOG_FILE")?;
        let max_bytes = env_u64("BOTPANEL_LOG_FILE_MAX_BYTES")
            .map(|v| v.clamp(256 * 1024, 1024 * 1024 * 1024))
            .unwrap_or(DEFAULT_LOG_FILE_MAX_BYTES);
        let max_files = env_usize("BOTPANEL_LOG_FILE_MAX_FILES")
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_LOG_FILE_MAX_FILES);
        Some(Self {
            path: PathBuf::from(path),
            max_bytes,
            max_files,
        })
    }
}

/// Everything the lifecycle manager and file store need to know about the host.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub files_root: PathBuf,
    pub runtime_program: String,
    pub install_program: String,
    pub install_args: Vec<String>,
    pub node_versions: Vec<String>,
    pub default_node_version: String,
    pub install_timeout: Duration,
    pub stop_grace: Duration,
    /// Delay before the "started successfully" confirmation is logged.
    pub start_confirm_delay: Duration,
}

impl AgentConfig {
    /// Defaults rooted at `files_root`; no environment lookups.
    pub fn new(files_root: impl Into<PathBuf>) -> Self {
        Self {
            files_root: files_root.into(),
            runtime_program: "node".to_string(),
            install_program: "npm".to_string(),
            install_args: vec![
                "install".to_string(),
                "--production".to_string(),
                "--no-audit".to_string(),
                "--no-fund".to_string(),
            ],
            node_versions: DEFAULT_NODE_VERSIONS.iter().map(|v| v.to_string()).collect(),
            default_node_version: DEFAULT_NODE_VERSION.to_string(),
            install_timeout: Duration::from_secs(DEFAULT_INSTALL_TIMEOUT_SEC),
            stop_grace: Duration::from_secs(DEFAULT_STOP_GRACE_SEC),
            start_confirm_delay: Duration::from_secs(3),
        }
    }

    pub fn from_env() -> Self {
        let root = env_string("BOTPANEL_FILES_ROOT").unwrap_or_else(|| DEFAULT_FILES_ROOT.into());
        let mut cfg = Self::new(root);

        if let Some(p) = env_string("BOTPANEL_RUNTIME_PROGRAM") {
            cfg.runtime_program = p;
        }
        if let Some(p) = env_string("BOTPANEL_INSTALL_PROGRAM") {
            cfg.install_program = p;
        }
        if let Some(raw) = env_string("BOTPANEL_NODE_VERSIONS") {
            let versions: Vec<String> = raw
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
            if !versions.is_empty() {
                cfg.node_versions = versions;
            }
        }
        if let Some(v) = env_string("BOTPANEL_DEFAULT_NODE_VERSION") {
            cfg.default_node_version = v;
        }
        // The default label must be selectable, otherwise switching back is impossible.
        if !cfg.node_versions.contains(&cfg.default_node_version) {
            cfg.node_versions.insert(0, cfg.default_node_version.clone());
        }

        cfg.install_timeout = Duration::from_secs(
            env_u64("BOTPANEL_INSTALL_TIMEOUT_SEC")
                .map(|v| v.clamp(10, 2 * 60 * 60))
                .unwrap_or(DEFAULT_INSTALL_TIMEOUT_SEC),
        );
        cfg.stop_grace = Duration::from_secs(
            env_u64("BOTPANEL_STOP_GRACE_SEC")
                .map(|v| v.clamp(1, 60))
                .unwrap_or(DEFAULT_STOP_GRACE_SEC),
        );
        cfg
    }

    pub fn credential_path(&self) -> PathBuf {
        self.files_root.join(CREDENTIAL_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.files_root.join(MANIFEST_FILE)
    }

    /// First entry-file candidate present in the bot-files root.
    pub fn find_entry_file(&self) -> Option<&'static str> {
        ENTRY_FILE_CANDIDATES
            .iter()
            .copied()
            .find(|f| self.files_root.join(f).is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_file_first_match_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AgentConfig::new(dir.path());
        assert_eq!(cfg.find_entry_file(), None);

        std::fs::write(dir.path().join("app.js"), "").unwrap();
        assert_eq!(cfg.find_entry_file(), Some("app.js"));

        std::fs::write(dir.path().join("bot.js"), "").unwrap();
        assert_eq!(cfg.find_entry_file(), Some("bot.js"));
    }

    #[test]
    fn entry_file_ignores_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("index.js")).unwrap();
        let cfg = AgentConfig::new(dir.path());
        assert_eq!(cfg.find_entry_file(), None);
    }

    #[test]
    fn defaults_match_panel_conventions() {
        let cfg = AgentConfig::new("/tmp/x");
        assert_eq!(cfg.stop_grace, Duration::from_secs(5));
        assert_eq!(cfg.default_node_version, "18");
        assert!(cfg.node_versions.iter().any(|v| v == "21"));
        assert_eq!(cfg.credential_path(), PathBuf::from("/tmp/x/.env"));
    }
}
