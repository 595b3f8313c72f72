use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_LEDGER_PATH: &str = "bear_import_log.jsonl";
pub const DEFAULT_RESULTS_PATH: &str = "conversation_check.jsonl";
pub const DEFAULT_LISTENER_URL: &str = "http://localhost:3000";
pub const DEFAULT_ORIGIN_URL: &str = "https://chat.openai.com/c/";
pub const DEFAULT_TAG_PREFIX: &str = "chatgpt/archive";
pub const DEFAULT_MAX_ITEMS: usize = 1000;

/// Which pass to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Import,
    CheckExists,
}

/// Settings that shape the rendered note and its callback URLs.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Prefix the conversation id is appended to for the "ChatGPT Link".
    pub origin_url: String,
    /// Base of the local listener that receives x-success / x-error callbacks.
    pub listener_url: Url,
    pub tag_prefix: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            origin_url: DEFAULT_ORIGIN_URL.to_string(),
            listener_url: default_listener_url(),
            tag_prefix: DEFAULT_TAG_PREFIX.to_string(),
        }
    }
}

pub fn default_listener_url() -> Url {
    // Constant input, parse cannot fail.
    Url::parse(DEFAULT_LISTENER_URL).unwrap_or_else(|_| unreachable!())
}

/// Configuration required to run a migration or reconciliation pass.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: Mode,
    pub export_path: Option<PathBuf>,
    pub ledger_path: PathBuf,
    pub results_path: PathBuf,
    pub max_items: usize,
    pub force_check: bool,
    /// Append a ledger line after each submitted conversation.
    pub record_imports: bool,
    pub import_delay: Duration,
    pub check_delay: Duration,
    pub listener_command: Vec<String>,
    pub startup_timeout: Duration,
    pub render: RenderSettings,
    pub quiet: bool,
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Import,
            export_path: None,
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            results_path: PathBuf::from(DEFAULT_RESULTS_PATH),
            max_items: DEFAULT_MAX_ITEMS,
            force_check: false,
            record_imports: false,
            import_delay: Duration::from_millis(1000),
            check_delay: Duration::from_millis(100),
            listener_command: vec!["node".to_string(), "server.js".to_string()],
            startup_timeout: Duration::from_millis(3000),
            render: RenderSettings::default(),
            quiet: false,
            verbose: false,
        }
    }
}

/// Failures that end a run. Skipped conversations are not errors and never show up here.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("invalid JSON in {} (line {line})", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("listener failed to start: {0}")]
    ChannelStartup(String),
}

impl MigrateError {
    /// Map an I/O error on `path`, turning `NotFound` into its own variant.
    pub fn from_io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            MigrateError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            MigrateError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Progress bar for a sequential pass, hidden when logs would interleave with it.
pub fn progress_bar(len: usize, quiet: bool, verbose: bool) -> indicatif::ProgressBar {
    if quiet || verbose {
        return indicatif::ProgressBar::hidden();
    }
    let bar = indicatif::ProgressBar::new(len as u64);
    if let Ok(style) =
        indicatif::ProgressStyle::with_template("{bar:40.green/black} {pos}/{len} {msg}")
    {
        bar.set_style(style);
    }
    bar
}
