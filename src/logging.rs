//! Structured logging and tracing for Spotheat
//!
//! Console, rolling file and an in-process broadcast layer that feeds the
//! dashboard's live log view.

use crate::config::LoggingConfig;
use crate::error::{Result, SpotheatError};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::sync::RwLock as StdRwLock;
use tokio::sync::broadcast;
use tracing::{Level, Subscriber, debug, error, info, trace, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Set to force console-only logging (no rolling file)
pub const DISABLE_FILE_LOG_ENV: &str = "SPOTHEAT_DISABLE_FILE_LOG";

// The non-blocking worker guard must outlive every log call
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static INIT_ONCE: Once = Once::new();
static INIT_ERROR: OnceCell<String> = OnceCell::new();
static LOG_BROADCAST_TX: OnceCell<broadcast::Sender<String>> = OnceCell::new();
static WEB_LOG_LEVEL: OnceCell<StdRwLock<Level>> = OnceCell::new();

#[derive(Clone)]
struct BroadcastMakeWriter {
    tx: broadcast::Sender<String>,
}

/// Buffers one formatted event and publishes it as a single line on drop
struct BroadcastWriter {
    tx: broadcast::Sender<String>,
    buffer: Vec<u8>,
}

impl<'a> MakeWriter<'a> for BroadcastMakeWriter {
    type Writer = BroadcastWriter;
    fn make_writer(&'a self) -> Self::Writer {
        BroadcastWriter {
            tx: self.tx.clone(),
            buffer: Vec::with_capacity(256),
        }
    }
}

impl Write for BroadcastWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for BroadcastWriter {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.buffer);
        let line = line.trim_end_matches(['\n', '\r']).to_string();
        // No subscribers is the normal case when nobody watches the dashboard
        let _ = self.tx.send(line);
    }
}

fn get_or_init_log_tx() -> broadcast::Sender<String> {
    LOG_BROADCAST_TX
        .get_or_init(|| {
            let (tx, _rx) = broadcast::channel::<String>(1024);
            tx
        })
        .clone()
}

/// Initialize the global subscriber from configuration
///
/// Safe to call more than once; only the first call installs layers and its
/// outcome is returned to every later caller.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    INIT_ONCE.call_once(|| {
        if let Err(e) = install(config) {
            let _ = INIT_ERROR.set(e.to_string());
        }
    });

    match INIT_ERROR.get() {
        Some(err) => Err(SpotheatError::config(err.clone())),
        None => Ok(()),
    }
}

fn install(config: &LoggingConfig) -> Result<()> {
    let base_level = parse_log_level(&config.level)?;
    let layer_level = |opt: &Option<String>| {
        opt.as_deref()
            .and_then(|s| parse_log_level(s).ok())
            .unwrap_or(base_level)
    };
    let console_level = layer_level(&config.console_level);
    let file_level = layer_level(&config.file_level);
    let web_level = layer_level(&config.web_level);

    // The global filter admits the most verbose layer; layers down-filter
    let most_verbose = min_level(min_level(console_level, file_level), web_level);
    let filter = build_env_filter(most_verbose);
    let _ = WEB_LOG_LEVEL.set(StdRwLock::new(web_level));

    let broadcast = BroadcastMakeWriter {
        tx: get_or_init_log_tx(),
    };

    if should_use_console_only() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer(std::io::stdout, config.json_format, console_level))
            .with(fmt_layer(broadcast, config.json_format, Level::TRACE))
            .init();
        info!(
            "Logging initialized - console_level: {:?}, web_level: {:?}, console-only",
            console_level, web_level
        );
        return Ok(());
    }

    let layout = LogFileLayout::from_config(&config.file);
    let file_appender = rolling::Builder::new()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix(&layout.prefix)
        .filename_suffix(&layout.suffix)
        .max_log_files(config.backup_count.max(1) as usize)
        .build(&layout.dir)
        .map_err(|e| SpotheatError::io(format!("Failed to create log file appender: {}", e)))?;
    let (file_writer, guard) = non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let console = config
        .console_output
        .then(|| fmt_layer(std::io::stdout, config.json_format, console_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer(file_writer, config.json_format, file_level))
        .with(fmt_layer(broadcast, config.json_format, Level::TRACE))
        .with(console)
        .init();

    info!(
        "Logging initialized - console_level: {:?}, file_level: {:?}, web_level: {:?}, file: {}",
        console_level, file_level, web_level, config.file
    );
    Ok(())
}

fn fmt_layer<S, W>(writer: W, json: bool, level: Level) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = fmt::layer()
        .with_writer(writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false);
    if json {
        base.json()
            .with_filter(LevelFilter::from_level(level))
            .boxed()
    } else {
        base.with_filter(LevelFilter::from_level(level)).boxed()
    }
}

/// Where the rolling appender writes and how its files are named
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileLayout {
    pub dir: PathBuf,
    pub prefix: String,
    pub suffix: String,
}

impl LogFileLayout {
    /// A path with an extension names the file (`heater.log` rotates to
    /// `heater.<date>.log`); a path without one is the log directory
    pub fn from_config(file: &str) -> Self {
        let p = Path::new(file);
        let Some(ext) = p.extension().and_then(|e| e.to_str()) else {
            return Self {
                dir: p.to_path_buf(),
                prefix: "spotheat".into(),
                suffix: "log".into(),
            };
        };
        let dir = p
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        Self {
            dir: dir.to_path_buf(),
            prefix: p
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("spotheat")
                .to_string(),
            suffix: ext.to_string(),
        }
    }
}

fn build_env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("spotheat={},hyper=warn,reqwest=warn", level).into())
}

fn should_use_console_only() -> bool {
    cfg!(test) || std::env::var_os(DISABLE_FILE_LOG_ENV).is_some()
}

/// Parse log level string to tracing Level
pub fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.trim().to_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "ERROR" => Ok(Level::ERROR),
        _ => Err(SpotheatError::config(format!(
            "Invalid log level: {}",
            level_str
        ))),
    }
}

/// Context attached to every message of a component logger
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component name (e.g. "controller", "relay", "web")
    pub component: String,

    /// Additional key/value fields, rendered in key order
    pub extra_fields: BTreeMap<String, String>,
}

impl LogContext {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            extra_fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.extra_fields.insert(key.to_string(), value.into());
        self
    }
}

/// Structured logger with context
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    context: LogContext,
}

impl StructuredLogger {
    pub fn new(context: LogContext) -> Self {
        Self { context }
    }

    pub fn info(&self, message: &str) {
        let fields = self.format_fields();
        info!(%fields, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        let fields = self.format_fields();
        warn!(%fields, "{}", message);
    }

    pub fn error(&self, message: &str) {
        let fields = self.format_fields();
        error!(%fields, "{}", message);
    }

    pub fn debug(&self, message: &str) {
        let fields = self.format_fields();
        debug!(%fields, "{}", message);
    }

    pub fn trace(&self, message: &str) {
        let fields = self.format_fields();
        trace!(%fields, "{}", message);
    }

    fn format_fields(&self) -> String {
        std::iter::once(format!("component={}", self.context.component))
            .chain(
                self.context
                    .extra_fields
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v)),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Create a logger for a specific component
pub fn get_logger(component: &str) -> StructuredLogger {
    StructuredLogger::new(LogContext::new(component))
}

/// Create a logger with full context
pub fn get_logger_with_context(context: LogContext) -> StructuredLogger {
    StructuredLogger::new(context)
}

/// Subscribe to a stream of formatted log lines
pub fn subscribe_log_lines() -> broadcast::Receiver<String> {
    get_or_init_log_tx().subscribe()
}

/// Current level of the web log stream. Defaults to INFO if unset.
pub fn get_web_log_level() -> Level {
    WEB_LOG_LEVEL
        .get()
        .and_then(|lock| lock.read().ok().map(|g| *g))
        .unwrap_or(Level::INFO)
}

fn level_rank(level: Level) -> u8 {
    match level {
        Level::TRACE => 0,
        Level::DEBUG => 1,
        Level::INFO => 2,
        Level::WARN => 3,
        Level::ERROR => 4,
    }
}

fn min_level(a: Level, b: Level) -> Level {
    if level_rank(a) <= level_rank(b) { a } else { b }
}

const LEVELS: [Level; 5] = [
    Level::TRACE,
    Level::DEBUG,
    Level::INFO,
    Level::WARN,
    Level::ERROR,
];

/// Try to parse a level out of a formatted log line (JSON or plain)
pub fn parse_line_level(line: &str) -> Option<Level> {
    LEVELS
        .iter()
        .find(|lvl| line.contains(&format!("\"level\":\"{}\"", lvl)))
        .or_else(|| {
            LEVELS
                .iter()
                .find(|lvl| line.contains(&format!(" {} ", lvl)))
        })
        .copied()
}

/// Whether a formatted line passes the web stream's level
pub fn should_emit_to_web(line: &str) -> bool {
    match parse_line_level(line) {
        Some(line_lvl) => level_rank(line_lvl) >= level_rank(get_web_log_level()),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("warning").unwrap(), Level::WARN);
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_structured_logger_fields() {
        init_logging(&LoggingConfig::default()).ok();
        let logger = StructuredLogger::new(
            LogContext::new("relay").with_field("host", "192.168.1.106"),
        );
        assert_eq!(
            logger.format_fields(),
            "component=relay,host=192.168.1.106"
        );
        logger.info("Test info message");
        logger.warn("Test warning message");
    }

    #[test]
    fn parses_levels_from_formatted_lines() {
        assert_eq!(
            parse_line_level("2024-03-01T10:00:00Z  WARN component=relay: boom"),
            Some(Level::WARN)
        );
        assert_eq!(
            parse_line_level(r#"{"timestamp":"x","level":"ERROR","fields":{}}"#),
            Some(Level::ERROR)
        );
        assert_eq!(parse_line_level("no level here"), None);
    }

    #[test]
    fn file_layout_follows_configured_name() {
        let layout = LogFileLayout::from_config("/var/log/heater.log");
        assert_eq!(layout.dir, Path::new("/var/log"));
        assert_eq!(layout.prefix, "heater");
        assert_eq!(layout.suffix, "log");

        let layout = LogFileLayout::from_config("spotheat.txt");
        assert_eq!(layout.dir, Path::new("."));
        assert_eq!((layout.prefix.as_str(), layout.suffix.as_str()), ("spotheat", "txt"));

        let layout = LogFileLayout::from_config("/var/log/spotheat");
        assert_eq!(layout.dir, Path::new("/var/log/spotheat"));
        assert_eq!((layout.prefix.as_str(), layout.suffix.as_str()), ("spotheat", "log"));
    }
}
