/// Lifecycle state of the single managed bot process.
///
/// NOTE: There is exactly one of these per panel. Only the agent's lifecycle
/// manager mutates it; everything else observes snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotState {
    #[default]
    Stopped,
    InstallingDependencies,
    Starting,
    Running,
}

impl BotState {
    pub fn as_str(self) -> &'static str {
        match self {
            BotState::Stopped => "stopped",
            BotState::InstallingDependencies => "installing_dependencies",
            BotState::Starting => "starting",
            BotState::Running => "running",
        }
    }

    /// A start or install is underway, or the bot is up.
    pub fn is_busy(self) -> bool {
        !matches!(self, BotState::Stopped)
    }
}

impl std::fmt::Display for BotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// One line of the panel log as the dashboard sees it.
///
/// Field names on the wire (`type`, `username`) match what the dashboard
/// scripts already read.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub message: String,
    #[serde(rename = "type")]
    pub severity: Severity,
    #[serde(rename = "username")]
    pub actor: String,
}

pub const ACTOR_SYSTEM: &str = "system";
pub const ACTOR_BOT: &str = "bot";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_state_serializes_snake_case() {
        let s = serde_json::to_string(&BotState::InstallingDependencies).unwrap();
        assert_eq!(s, "\"installing_dependencies\"");
        assert_eq!(BotState::Running.to_string(), "running");
    }

    #[test]
    fn only_stopped_is_idle() {
        assert!(!BotState::Stopped.is_busy());
        assert!(BotState::Starting.is_busy());
        assert!(BotState::InstallingDependencies.is_busy());
        assert!(BotState::Running.is_busy());
    }

    #[test]
    fn log_entry_uses_dashboard_field_names() {
        let e = LogEntry {
            timestamp: "12:00:00".to_string(),
            message: "hello".to_string(),
            severity: Severity::Warning,
            actor: ACTOR_BOT.to_string(),
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "warning");
        assert_eq!(v["username"], "bot");
    }
}
