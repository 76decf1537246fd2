use std::{
    collections::BTreeMap,
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::{Duration, Instant},
};

use botpanel_process::{ACTOR_BOT, ACTOR_SYSTEM, BotState};
use serde::Serialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};

use crate::{
    config::{AgentConfig, ENTRY_FILE_CANDIDATES},
    credential::{BotToken, CredentialStore, validate_token},
    error::{PanelError, PanelResult, format_error_chain},
    log_sink::LogSink,
    process_support::{
        ExitReason, StopSignal, configure_process_group, exit_reason, read_proc_rss_bytes,
        signal_group,
    },
};

const OUTPUT_CHANNEL_CAPACITY: usize = 1024;
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const KILL_WAIT: Duration = Duration::from_secs(5);
const INSTALLER_NOISE: &str = "npm WARN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct OutputLine {
    stream: Stream,
    line: String,
}

/// Bookkeeping for the live bot child. Dropped once its exit is processed.
#[derive(Debug)]
struct BotProcessHandle {
    pid: Option<u32>,
    pgid: Option<i32>,
    kill_tx: mpsc::UnboundedSender<()>,
    exited: watch::Receiver<bool>,
}

#[derive(Debug)]
struct Inner {
    state: BotState,
    started_at: Option<Instant>,
    uptime: Duration,
    /// Bumped on every spawn; stale exit events and timers compare against it.
    generation: u64,
    handle: Option<BotProcessHandle>,
    tick: Option<JoinHandle<()>>,
    token: Option<BotToken>,
    node_version: String,
}

impl Inner {
    fn live_uptime(&self) -> Duration {
        match (self.state, self.started_at) {
            (BotState::Running, Some(t)) => t.elapsed(),
            _ => self.uptime,
        }
    }

    fn reset_to_stopped(&mut self) {
        self.state = BotState::Stopped;
        self.started_at = None;
        self.uptime = Duration::ZERO;
        self.handle = None;
        if let Some(t) = self.tick.take() {
            t.abort();
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    pub main_file: String,
    pub node_version: String,
    pub status: BotState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopOutcome {
    /// Uptime observed when the stop was requested, in milliseconds.
    pub uptime: u64,
    pub forced: bool,
    pub status: BotState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeVersions {
    pub current: String,
    pub available: Vec<String>,
    pub default: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    pub has_token: bool,
    pub token_length: usize,
}

#[derive(Debug, Clone)]
pub struct ManagerSnapshot {
    pub state: BotState,
    pub uptime_ms: u64,
    pub pid: Option<u32>,
    pub node_version: String,
}

/// Owns the single supervised bot process and its lifecycle state.
#[derive(Clone, Debug)]
pub struct BotManager {
    cfg: Arc<AgentConfig>,
    sink: LogSink,
    credentials: CredentialStore,
    inner: Arc<Mutex<Inner>>,
}

impl BotManager {
    pub fn new(cfg: AgentConfig, sink: LogSink) -> Self {
        let credentials = CredentialStore::new(cfg.credential_path());
        let inner = Inner {
            state: BotState::Stopped,
            started_at: None,
            uptime: Duration::ZERO,
            generation: 0,
            handle: None,
            tick: None,
            token: None,
            node_version: cfg.default_node_version.clone(),
        };
        Self {
            cfg: Arc::new(cfg),
            sink,
            credentials,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.cfg
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    pub async fn state(&self) -> BotState {
        self.inner.lock().await.state
    }

    pub async fn uptime_ms(&self) -> u64 {
        duration_ms(self.inner.lock().await.live_uptime())
    }

    pub async fn snapshot(&self) -> ManagerSnapshot {
        let inner = self.inner.lock().await;
        ManagerSnapshot {
            state: inner.state,
            uptime_ms: duration_ms(inner.live_uptime()),
            pid: inner.handle.as_ref().and_then(|h| h.pid),
            node_version: inner.node_version.clone(),
        }
    }

    /// Resident memory of the bot child, when one is running.
    pub async fn bot_rss_bytes(&self) -> Option<u64> {
        let pid = self.inner.lock().await.handle.as_ref().and_then(|h| h.pid)?;
        read_proc_rss_bytes(pid).await
    }

    /// Picks up a previously saved credential. Called once at boot.
    pub async fn load_saved_token(&self) {
        let mut inner = self.inner.lock().await;
        inner.token = self.read_credential_file().await;
    }

    async fn read_credential_file(&self) -> Option<BotToken> {
        match self.credentials.load().await {
            Ok(Some(token)) => {
                self.sink
                    .success(ACTOR_SYSTEM, "Bot token loaded from .env file");
                Some(token)
            }
            Ok(None) => None,
            Err(e) => {
                self.sink.warning(
                    ACTOR_SYSTEM,
                    format!("Could not read .env file: {}", format_error_chain(&e)),
                );
                None
            }
        }
    }

    pub async fn token_status(&self) -> TokenStatus {
        let inner = self.inner.lock().await;
        TokenStatus {
            has_token: inner.token.is_some(),
            token_length: inner.token.as_ref().map(|t| t.len()).unwrap_or(0),
        }
    }

    pub async fn save_token(&self, raw: &str, actor: &str) -> PanelResult<()> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PanelError::validation("Token is required"));
        }
        let token = validate_token(raw)?;

        let mut inner = self.inner.lock().await;
        if let Err(e) = self.credentials.save(&token, &inner.node_version).await {
            self.sink.error(
                actor,
                format!("Error saving token: {}", format_error_chain(&e)),
            );
            return Err(PanelError::Internal(e.context("save bot token")));
        }
        inner.token = Some(token);
        drop(inner);

        self.sink.success(actor, "Discord bot token saved securely");
        Ok(())
    }

    pub async fn node_versions(&self) -> NodeVersions {
        let inner = self.inner.lock().await;
        NodeVersions {
            current: inner.node_version.clone(),
            available: self.cfg.node_versions.clone(),
            default: self.cfg.default_node_version.clone(),
        }
    }

    pub async fn switch_node_version(&self, version: &str, actor: &str) -> PanelResult<String> {
        let version = version.trim();
        if version.is_empty() {
            return Err(PanelError::validation("Node.js version is required"));
        }

        let mut inner = self.inner.lock().await;
        if inner.state.is_busy() {
            return Err(PanelError::conflict(
                "Cannot switch Node.js version while bot is running. Please stop the bot first.",
            ));
        }
        if !self.cfg.node_versions.iter().any(|v| v == version) {
            return Err(PanelError::validation(format!(
                "Node.js version {version} is not available"
            )));
        }
        inner.node_version = version.to_string();
        drop(inner);

        self.sink
            .success(actor, format!("Switched to Node.js version {version}"));
        Ok(version.to_string())
    }

    pub async fn start(&self, actor: &str) -> PanelResult<StartOutcome> {
        let (main_file, install) = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                BotState::Stopped => {}
                BotState::Running => return Err(PanelError::conflict("Bot is already running")),
                BotState::InstallingDependencies => {
                    return Err(PanelError::conflict(
                        "Dependencies are being installed. Please wait...",
                    ));
                }
                BotState::Starting => {
                    return Err(PanelError::conflict("Bot is already starting. Please wait..."));
                }
            }

            if inner.token.is_none() {
                inner.token = self.read_credential_file().await;
            }

            let mut field_errors = BTreeMap::new();
            if inner.token.is_none() {
                field_errors.insert(
                    "token".to_string(),
                    "Please set Discord bot token first".to_string(),
                );
            }
            let main_file = if !self.cfg.files_root.is_dir() {
                field_errors.insert(
                    "mainFile".to_string(),
                    "No bot files found. Please upload your bot files first.".to_string(),
                );
                None
            } else {
                let found = self.cfg.find_entry_file();
                if found.is_none() {
                    field_errors.insert(
                        "mainFile".to_string(),
                        format!(
                            "No main bot file found (expected one of: {})",
                            ENTRY_FILE_CANDIDATES.join(", ")
                        ),
                    );
                }
                found
            };

            let Some(main_file) = main_file.filter(|_| field_errors.is_empty()) else {
                let message = field_errors
                    .values()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("; ");
                self.sink.error(actor, &message);
                return Err(PanelError::validation_fields(message, field_errors));
            };

            let install = self.cfg.manifest_path().is_file();
            inner.state = if install {
                BotState::InstallingDependencies
            } else {
                BotState::Starting
            };
            (main_file.to_string(), install)
        };

        if install {
            self.sink.info(actor, "Installing dependencies...");
            if let Err(e) = self.install_dependencies(actor).await {
                self.inner.lock().await.reset_to_stopped();
                return Err(e);
            }
            self.sink.success(actor, "Dependencies installed successfully");
            self.inner.lock().await.state = BotState::Starting;
        } else {
            self.sink.warning(
                actor,
                "No package.json found, skipping dependency installation",
            );
        }

        self.spawn_bot(main_file, actor).await
    }

    async fn install_dependencies(&self, actor: &str) -> PanelResult<()> {
        let mut cmd = Command::new(&self.cfg.install_program);
        cmd.args(&self.cfg.install_args)
            .current_dir(&self.cfg.files_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        configure_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| {
            self.sink.error(actor, format!("NPM install error: {e}"));
            PanelError::external(format!("Failed to install dependencies: {e}"), None)
        })?;
        let pgid = child.id().map(|p| p as i32);

        let sink = self.sink.clone();
        let actor_owned = actor.to_string();
        let forwarder = spawn_output_pumps(
            child.stdout.take(),
            child.stderr.take(),
            move |line| match line.stream {
                Stream::Stdout => sink.info(&actor_owned, format!("NPM: {}", line.line)),
                Stream::Stderr => {
                    if !line.line.contains(INSTALLER_NOISE) {
                        sink.warning(&actor_owned, format!("NPM Warning: {}", line.line));
                    }
                }
            },
        );

        let waited = tokio::time::timeout(self.cfg.install_timeout, child.wait()).await;
        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                self.sink.error(actor, format!("NPM install error: {e}"));
                return Err(PanelError::external(
                    format!("Failed to install dependencies: {e}"),
                    None,
                ));
            }
            Err(_) => {
                signal_group(pgid, StopSignal::Forced);
                let _ = child.kill().await;
                let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, forwarder).await;
                self.sink.error(
                    actor,
                    format!(
                        "Dependency install timed out after {}s",
                        self.cfg.install_timeout.as_secs()
                    ),
                );
                return Err(PanelError::external("dependency install timed out", None));
            }
        };

        let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, forwarder).await;

        if status.success() {
            return Ok(());
        }
        let code = status.code();
        let shown = code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        self.sink.error(
            actor,
            format!("Failed to install dependencies (exit code: {shown})"),
        );
        Err(PanelError::external("Failed to install dependencies", code))
    }

    async fn spawn_bot(&self, main_file: String, actor: &str) -> PanelResult<StartOutcome> {
        let (token, node_version) = {
            let inner = self.inner.lock().await;
            (inner.token.clone(), inner.node_version.clone())
        };
        let Some(token) = token else {
            self.inner.lock().await.reset_to_stopped();
            return Err(PanelError::validation("Please set Discord bot token first"));
        };

        self.sink.info(
            actor,
            format!("Starting bot {main_file} with Node.js {node_version}..."),
        );

        let mut cmd = Command::new(&self.cfg.runtime_program);
        cmd.arg(&main_file)
            .current_dir(&self.cfg.files_root)
            .env("DISCORD_TOKEN", token.expose())
            .env("NODE_ENV", "production")
            .env("NODE_VERSION", &node_version)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        configure_process_group(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.inner.lock().await.reset_to_stopped();
                self.sink
                    .error(actor, format!("Failed to start bot process: {e}"));
                return Err(PanelError::external(format!("Failed to start bot: {e}"), None));
            }
        };

        let pid = child.id();
        let (kill_tx, kill_rx) = mpsc::unbounded_channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(false);

        let sink = self.sink.clone();
        let forwarder = spawn_output_pumps(
            child.stdout.take(),
            child.stderr.take(),
            move |line| match line.stream {
                Stream::Stdout => sink.info(ACTOR_BOT, format!("Bot: {}", line.line)),
                Stream::Stderr => sink.error(ACTOR_BOT, format!("Bot Error: {}", line.line)),
            },
        );

        let generation = {
            let mut inner = self.inner.lock().await;
            inner.generation = inner.generation.wrapping_add(1);
            inner.state = BotState::Running;
            inner.started_at = Some(Instant::now());
            inner.uptime = Duration::ZERO;
            inner.handle = Some(BotProcessHandle {
                pid,
                pgid: pid.map(|p| p as i32),
                kill_tx,
                exited: exit_rx,
            });
            if let Some(old) = inner.tick.take() {
                old.abort();
            }
            inner.tick = Some(self.spawn_uptime_tick(inner.generation));
            inner.generation
        };

        tracing::info!(pid = ?pid, main_file = %main_file, "bot process spawned");

        self.spawn_exit_watcher(child, generation, kill_rx, exit_tx, forwarder);
        self.spawn_start_confirmation(generation, &main_file, &node_version, actor);

        Ok(StartOutcome {
            main_file,
            node_version,
            status: BotState::Starting,
        })
    }

    fn spawn_uptime_tick(&self, generation: u64) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let mut g = inner.lock().await;
                if g.generation != generation || g.state != BotState::Running {
                    break;
                }
                if let Some(t) = g.started_at {
                    g.uptime = t.elapsed();
                }
            }
        })
    }

    fn spawn_start_confirmation(
        &self,
        generation: u64,
        main_file: &str,
        node_version: &str,
        actor: &str,
    ) {
        let inner = self.inner.clone();
        let sink = self.sink.clone();
        let delay = self.cfg.start_confirm_delay;
        let message = format!("Bot {main_file} started successfully with Node.js {node_version}!");
        let actor = actor.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_running = {
                let g = inner.lock().await;
                g.generation == generation && g.state == BotState::Running
            };
            if still_running {
                sink.success(&actor, message);
            }
        });
    }

    fn spawn_exit_watcher(
        &self,
        mut child: Child,
        generation: u64,
        mut kill_rx: mpsc::UnboundedReceiver<()>,
        exit_tx: watch::Sender<bool>,
        forwarder: JoinHandle<()>,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            let status = loop {
                tokio::select! {
                    res = child.wait() => break res,
                    Some(()) = kill_rx.recv() => {
                        let _ = child.start_kill();
                    }
                }
            };
            // Buffered output lands before the exit line.
            let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, forwarder).await;
            manager.on_exit(generation, status).await;
            let _ = exit_tx.send(true);
        });
    }

    async fn on_exit(&self, generation: u64, status: std::io::Result<ExitStatus>) {
        {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return;
            }
            inner.reset_to_stopped();
        }

        match status {
            Ok(status) => match exit_reason(status) {
                ExitReason::Signal(name) => self.sink.warning(
                    ACTOR_SYSTEM,
                    format!("Bot process terminated with signal: {name}"),
                ),
                ExitReason::Code(0) => self.sink.info(ACTOR_SYSTEM, "Bot stopped normally"),
                ExitReason::Code(code) => self
                    .sink
                    .error(ACTOR_SYSTEM, format!("Bot exited with code {code}")),
                ExitReason::Unknown => self.sink.warning(ACTOR_SYSTEM, "Bot process exited"),
            },
            Err(e) => self
                .sink
                .error(ACTOR_SYSTEM, format!("Failed to wait for bot process: {e}")),
        }
    }

    pub async fn stop(&self, actor: &str) -> PanelResult<StopOutcome> {
        let (pgid, kill_tx, mut exited, uptime_ms) = {
            let inner = self.inner.lock().await;
            match inner.state {
                BotState::Running => {}
                BotState::Stopped => return Err(PanelError::conflict("Bot is not running")),
                BotState::InstallingDependencies => {
                    return Err(PanelError::conflict(
                        "Dependencies are being installed. Please wait...",
                    ));
                }
                BotState::Starting => {
                    return Err(PanelError::conflict("Bot is still starting. Please wait..."));
                }
            }
            let Some(h) = inner.handle.as_ref() else {
                return Err(PanelError::conflict("Bot is not running"));
            };
            (
                h.pgid,
                h.kill_tx.clone(),
                h.exited.clone(),
                duration_ms(inner.live_uptime()),
            )
        };

        self.sink.warning(actor, "Stopping bot process...");
        if !signal_group(pgid, StopSignal::Graceful) {
            let _ = kill_tx.send(());
        }

        let mut forced = false;
        if tokio::time::timeout(self.cfg.stop_grace, wait_exited(&mut exited))
            .await
            .is_err()
        {
            forced = true;
            self.sink.warning(
                actor,
                format!(
                    "Bot did not exit within {}s, sending SIGKILL",
                    self.cfg.stop_grace.as_secs()
                ),
            );
            signal_group(pgid, StopSignal::Forced);
            let _ = kill_tx.send(());
            if tokio::time::timeout(KILL_WAIT, wait_exited(&mut exited))
                .await
                .is_err()
            {
                tracing::warn!(?pgid, "bot process did not report exit after SIGKILL");
            }
        }

        let status = self.state().await;
        if status == BotState::Stopped {
            self.sink.warning(actor, "Bot process stopped");
        }

        Ok(StopOutcome {
            uptime: uptime_ms,
            forced,
            status,
        })
    }

    /// Stops a running bot during panel shutdown.
    pub async fn shutdown(&self) {
        if self.state().await == BotState::Running
            && let Err(e) = self.stop(ACTOR_SYSTEM).await
        {
            tracing::warn!(error = %e, "failed to stop bot during shutdown");
        }
    }
}

async fn wait_exited(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|done| *done).await;
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Reads both streams line by line into one ordered channel; `on_line` runs
/// on a single consumer task. The returned handle finishes once both streams
/// hit EOF and every line has been handled.
fn spawn_output_pumps<O, E, F>(
    stdout: Option<O>,
    stderr: Option<E>,
    on_line: F,
) -> JoinHandle<()>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
    F: Fn(OutputLine) + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<OutputLine>(OUTPUT_CHANNEL_CAPACITY);
    if let Some(out) = stdout {
        tokio::spawn(pump_lines(out, Stream::Stdout, tx.clone()));
    }
    if let Some(err) = stderr {
        tokio::spawn(pump_lines(err, Stream::Stderr, tx.clone()));
    }
    drop(tx);

    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            on_line(line);
        }
    })
}

async fn pump_lines<R>(reader: R, stream: Stream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim();
        if line.is_empty() {
            continue;
        }
        let line = OutputLine {
            stream,
            line: line.to_string(),
        };
        if tx.send(line).await.is_err() {
            break;
        }
    }
}
