use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::io::AsyncWriteExt;

use crate::error::{PanelError, PanelResult};

pub const TOKEN_KEY: &str = "DISCORD_TOKEN";

/// The bot's chat-platform credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct BotToken(String);

impl BotToken {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for BotToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BotToken(<redacted>)")
    }
}

/// Format check for a bot token: 59..=72 chars of `[A-Za-z0-9._-]`.
pub fn validate_token(token: &str) -> PanelResult<BotToken> {
    let len = token.len();
    let charset_ok = token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !(59..=72).contains(&len) || !charset_ok {
        return Err(PanelError::validation("Invalid Discord bot token format"));
    }
    Ok(BotToken(token.to_string()))
}

/// Reads `KEY=value` lines, returning the token value if present.
///
/// Blank lines and `#` comments are ignored; surrounding quotes on the value
/// are stripped.
pub fn parse_token(content: &str) -> Option<BotToken> {
    content.lines().find_map(|line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let (key, value) = line.split_once('=')?;
        if key.trim() != TOKEN_KEY {
            return None;
        }
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if value.is_empty() {
            return None;
        }
        Some(BotToken(value.to_string()))
    })
}

/// The `.env` file inside the bot-files root.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when there is no file or no token line in it.
    pub async fn load(&self) -> anyhow::Result<Option<BotToken>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.path.display()));
            }
        };
        Ok(parse_token(&content))
    }

    /// Replaces the file atomically with owner-only permissions.
    pub async fn save(&self, token: &BotToken, node_version: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("create bot files root")?;
        }

        let content = format!(
            "{TOKEN_KEY}={}\nNODE_ENV=production\nNODE_VERSION={node_version}\n",
            token.expose()
        );
        let tmp = crate::path_guard::temp_path_for(&self.path);

        let mut opts = tokio::fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        opts.mode(0o600);
        let mut f = opts.open(&tmp).await.context("create credential temp file")?;
        f.write_all(content.as_bytes())
            .await
            .context("write credential file")?;
        f.flush().await.ok();
        drop(f);

        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).context("persist credential file");
        }
        Ok(())
    }
}
