use std::{path::PathBuf, time::Duration};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_PUBLIC_DIR: &str = "./public";
const DEFAULT_USERNAME: &str = "admin";
const DEFAULT_PASSWORD: &str = "admin123";
const DEV_SESSION_SECRET: &str = "dev-insecure-change-me";
const DEFAULT_SESSION_TTL_HOURS: u64 = 24;
const DEFAULT_LOGIN_MAX_ATTEMPTS: usize = 10;
const DEFAULT_LOGIN_WINDOW_MS: u64 = 60_000;

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    env_string(name).and_then(|v| v.parse::<u64>().ok())
}

fn env_usize(name: &str) -> Option<usize> {
    env_string(name).and_then(|v| v.parse::<usize>().ok())
}

/// `BOTPANEL_ENV=development` turns on detailed 500 bodies.
pub fn is_development() -> bool {
    matches!(
        std::env::var("BOTPANEL_ENV")
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "development" | "dev"
    )
}

/// HTTP-side settings: listener, operator account, session and login limits.
#[derive(Clone)]
pub struct ControlSettings {
    pub port: u16,
    pub public_dir: PathBuf,
    pub username: String,
    pub password: String,
    pub session_secret: String,
    pub development: bool,
    pub session_ttl: Duration,
    pub login_max_attempts: usize,
    pub login_window: Duration,
}

impl std::fmt::Debug for ControlSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSettings")
            .field("port", &self.port)
            .field("public_dir", &self.public_dir)
            .field("username", &self.username)
            .field("development", &self.development)
            .field("session_ttl", &self.session_ttl)
            .field("login_max_attempts", &self.login_max_attempts)
            .field("login_window", &self.login_window)
            .finish_non_exhaustive()
    }
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            public_dir: PathBuf::from(DEFAULT_PUBLIC_DIR),
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            session_secret: DEV_SESSION_SECRET.to_string(),
            development: false,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_HOURS * 3600),
            login_max_attempts: DEFAULT_LOGIN_MAX_ATTEMPTS,
            login_window: Duration::from_millis(DEFAULT_LOGIN_WINDOW_MS),
        }
    }
}

impl ControlSettings {
    pub fn from_env() -> Self {
        let mut s = Self::default();

        if let Some(port) = env_string("PORT").and_then(|v| v.parse::<u16>().ok()) {
            s.port = port;
        }
        if let Some(dir) = env_string("BOTPANEL_PUBLIC_DIR") {
            s.public_dir = PathBuf::from(dir);
        }
        if let Some(u) = env_string("BOTPANEL_USERNAME") {
            s.username = u;
        }
        if let Some(p) = env_string("BOTPANEL_PASSWORD") {
            s.password = p;
        }
        if let Some(secret) = env_string("BOTPANEL_SESSION_SECRET") {
            s.session_secret = secret;
        }
        s.development = is_development();
        s.session_ttl = Duration::from_secs(
            env_u64("BOTPANEL_SESSION_TTL_HOURS")
                .map(|v| v.clamp(1, 720))
                .unwrap_or(DEFAULT_SESSION_TTL_HOURS)
                * 3600,
        );
        s.login_max_attempts = env_usize("BOTPANEL_LOGIN_MAX_ATTEMPTS")
            .map(|v| v.clamp(1, 1000))
            .unwrap_or(DEFAULT_LOGIN_MAX_ATTEMPTS);
        s.login_window = Duration::from_millis(
            env_u64("BOTPANEL_LOGIN_WINDOW_MS")
                .map(|v| v.clamp(1000, 3_600_000))
                .unwrap_or(DEFAULT_LOGIN_WINDOW_MS),
        );
        s
    }

    pub fn uses_default_credentials(&self) -> bool {
        self.password == DEFAULT_PASSWORD
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.session_secret == DEV_SESSION_SECRET
    }
}
