//! Bot supervision core: the lifecycle manager, the bot-files store, archive
//! extraction, the credential file and the shared panel log.

pub mod archive;
pub mod config;
pub mod credential;
pub mod error;
pub mod files;
pub mod log_sink;
pub mod path_guard;
pub mod process_manager;
mod process_support;
pub mod status;

pub use config::{AgentConfig, LogFileConfig};
pub use error::{PanelError, PanelResult, format_error_chain};
pub use files::FileStore;
pub use log_sink::LogSink;
pub use process_manager::BotManager;
pub use process_support::self_rss_bytes;
pub use status::{StatusSnapshot, snapshot};
