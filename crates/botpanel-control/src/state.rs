use std::{sync::Arc, time::Instant};

use botpanel_agent::{AgentConfig, BotManager, FileStore, LogSink};

use crate::{
    auth::{AuthConfig, LoginLimiter},
    settings::ControlSettings,
};

#[derive(Clone)]
pub struct AppState {
    pub manager: BotManager,
    pub files: FileStore,
    pub sink: LogSink,
    pub auth: Arc<AuthConfig>,
    pub login_limiter: Arc<LoginLimiter>,
    pub settings: Arc<ControlSettings>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: ControlSettings, agent: AgentConfig, sink: LogSink) -> anyhow::Result<Self> {
        let auth = AuthConfig::from_settings(&settings)?;
        let limiter = LoginLimiter::new(settings.login_max_attempts, settings.login_window);
        let files = FileStore::new(agent.files_root.clone(), sink.clone());
        let manager = BotManager::new(agent, sink.clone());
        Ok(Self {
            manager,
            files,
            sink,
            auth: Arc::new(auth),
            login_limiter: Arc::new(limiter),
            settings: Arc::new(settings),
            started_at: Instant::now(),
        })
    }
}
