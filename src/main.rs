use chat2bear::channel::{OpenChannel, ProcessListener};
use chat2bear::utils::{MigrateError, Mode, RenderSettings, RunConfig};
use chat2bear::{migrate, reconcile};
use clap::{Parser, ValueEnum};
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliMode {
    /// Create a Bear note for every conversation not yet in the ledger.
    Import,
    /// Ask Bear whether the notes in the ledger still exist.
    #[value(alias = "check_exists", alias = "check_bear_notes_exist")]
    CheckExists,
}

/// Import ChatGPT conversations into Bear.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// What to run.
    #[arg(long, value_enum, default_value_t = CliMode::Import)]
    mode: CliMode,

    /// Path to the ChatGPT export (conversations.json). Required for import.
    #[arg(long, alias = "chat_export_path", value_name = "PATH")]
    export: Option<PathBuf>,

    /// Path to the import ledger (JSON lines).
    /// Defaults to ./bear_import_log.jsonl if not set in config.
    #[arg(short = 'c', long, alias = "bear_import_log", value_name = "PATH")]
    ledger: Option<PathBuf>,

    /// Maximum number of conversations to import, or notes to check, in one run.
    #[arg(short, long, alias = "max_messages", value_name = "N")]
    max: Option<usize>,

    /// Check notes even when the ledger already knows whether they exist.
    #[arg(long, alias = "force_check")]
    force_check: bool,

    /// Append each submitted conversation to the ledger.
    #[arg(long)]
    record: bool,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/chat2bear/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace).
    /// Progress bars are shown only without -v.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress progress bars, summaries and every log line except run failures.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    ledger_path: Option<PathBuf>,
    results_path: Option<PathBuf>,
    listener_command: Option<Vec<String>>,
    listener_url: Option<Url>,
    import_delay_ms: Option<u64>,
    check_delay_ms: Option<u64>,
    startup_timeout_ms: Option<u64>,
    max_items: Option<usize>,
    tag_prefix: Option<String>,
    origin_url: Option<String>,
    record_imports: Option<bool>,
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        dirs::config_dir()
            .map(|d| d.join("chat2bear/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

/// Console filter when `RUST_LOG` is unset. Quiet still lets run failures through.
fn default_directive(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    // RUST_LOG wins over -v / -q
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(default_directive(verbose, quiet))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Runs end with a logged error, not an exit code.
fn report_failure(what: &str, err: MigrateError) {
    tracing::error!("{what} failed: {:#}", eyre::Report::new(err));
}

fn build_config(cli: Cli, file_cfg: FileConfig) -> RunConfig {
    let defaults = RunConfig::default();
    let render_defaults = RenderSettings::default();

    RunConfig {
        mode: match cli.mode {
            CliMode::Import => Mode::Import,
            CliMode::CheckExists => Mode::CheckExists,
        },
        export_path: cli.export,
        ledger_path: cli
            .ledger
            .or(file_cfg.ledger_path)
            .unwrap_or(defaults.ledger_path),
        results_path: file_cfg.results_path.unwrap_or(defaults.results_path),
        max_items: cli.max.or(file_cfg.max_items).unwrap_or(defaults.max_items),
        force_check: cli.force_check,
        record_imports: cli.record || file_cfg.record_imports.unwrap_or(false),
        import_delay: file_cfg
            .import_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.import_delay),
        check_delay: file_cfg
            .check_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.check_delay),
        listener_command: file_cfg
            .listener_command
            .unwrap_or(defaults.listener_command),
        startup_timeout: file_cfg
            .startup_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.startup_timeout),
        render: RenderSettings {
            origin_url: file_cfg.origin_url.unwrap_or(render_defaults.origin_url),
            listener_url: file_cfg
                .listener_url
                .unwrap_or(render_defaults.listener_url),
            tag_prefix: file_cfg.tag_prefix.unwrap_or(render_defaults.tag_prefix),
        },
        quiet: cli.quiet,
        verbose: cli.verbose > 0,
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve everything else (CLI > Config > Default)
    let config = build_config(cli, file_cfg);

    let mut channel = OpenChannel::default();
    let mut listener = ProcessListener::new(
        config.listener_command.clone(),
        config.render.listener_url.clone(),
        config.startup_timeout,
    );

    // 3. Run. Failures are reported, not turned into an exit code.
    match config.mode {
        Mode::Import => {
            let Some(export_path) = config.export_path.as_deref() else {
                return Err(eyre!("--export is required in import mode"));
            };
            match migrate::execute(&config, export_path, &mut channel, &mut listener) {
                Ok(report) => {
                    if !config.quiet {
                        println!("Existing conversations: {}", report.existing);
                        println!("Imported conversations: {}", report.imported);
                        println!("Total conversations: {}", report.total());
                    }
                }
                Err(e) => report_failure("Import", e),
            }
        }
        Mode::CheckExists => match reconcile::execute(&config, &mut channel, &mut listener) {
            Ok(stats) => {
                if !config.quiet {
                    println!("NO-BEAR-ID: {}", stats.no_note_id);
                    println!("EXISTS-IN-BEAR: {}", stats.already_known);
                    println!("Checked: {}", stats.checked);
                    println!("EXISTS-IN-BEAR-true: {}", stats.found);
                    println!("EXISTS-IN-BEAR-false: {}", stats.missing);
                }
            }
            Err(e) => report_failure("Check", e),
        },
    }

    Ok(())
}
