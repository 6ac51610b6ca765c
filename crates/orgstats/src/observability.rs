//! Run logging: one JSONL record per tracing event, stamped with the run.
//!
//! stdout carries the report, so logs go to a file under the user's data
//! directory (or wherever `ORGSTATS_LOG_PATH`, `ORGSTATS_LOG_DIR`, or the
//! `log_dir` config key point), and to stderr only when no file can be
//! opened. Nothing is ever written into the directory being reported from.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use tracing::Event;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

const ENV_LOG_PATH: &str = "ORGSTATS_LOG_PATH";
const ENV_LOG_DIR: &str = "ORGSTATS_LOG_DIR";
const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Crates whose debug output `-v` turns on; `-vv` traces everything.
const OWN_CRATES: &str = "orgstats=debug,orgstats_core=debug";

/// Identity of one report run, written into every log record.
#[derive(Clone, Debug)]
pub struct RunLog {
    /// Organization being reported on.
    pub org: String,
    /// `log_dir` from configuration, if any.
    pub log_dir: Option<PathBuf>,
    pid: u32,
}

impl RunLog {
    /// A run against `org`, logging under `log_dir` unless the environment
    /// says otherwise.
    pub fn new(org: &str, log_dir: Option<PathBuf>) -> Self {
        Self {
            org: org.trim().to_string(),
            log_dir,
            pid: std::process::id(),
        }
    }

    fn stamp(&self) -> Map<String, Value> {
        let mut stamp = Map::new();
        stamp.insert("org".to_string(), Value::String(self.org.clone()));
        stamp.insert("pid".to_string(), Value::from(self.pid));
        stamp
    }
}

/// Keeps the background log writer alive; drop it last.
pub struct LogGuard {
    _worker: WorkerGuard,
}

/// Install the global subscriber for this run.
///
/// # Errors
///
/// Only if the subscriber cannot be installed; an unwritable log location
/// falls back to stderr with a warning.
pub fn init(run: &RunLog, filter: EnvFilter) -> Result<LogGuard> {
    let (writer, worker) = match file_writer(run.log_dir.as_deref()) {
        Ok(pair) => pair,
        Err(err) => {
            eprintln!("warning: {err:#}; logging to stderr");
            tracing_appender::non_blocking(std::io::stderr())
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(RunLogLayer::new(writer, run.stamp()))
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "logging initialized");
    Ok(LogGuard { _worker: worker })
}

/// Filter from the CLI flags, then `RUST_LOG`, then the configured level.
pub fn env_filter(quiet: bool, verbose: u8, configured: &str) -> EnvFilter {
    match (quiet, verbose) {
        (true, _) => EnvFilter::new("error"),
        (false, 0) => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured))
        }
        (false, 1) => EnvFilter::new(OWN_CRATES),
        (false, _) => EnvFilter::new("trace"),
    }
}

// ============================================================================
// JSONL layer
// ============================================================================

/// Writes each event as one JSON object: timestamp, level, target, the run
/// stamp, fields of enclosing spans, then the event's own fields.
struct RunLogLayer<W> {
    writer: W,
    stamp: Map<String, Value>,
}

impl<W> RunLogLayer<W> {
    const fn new(writer: W, stamp: Map<String, Value>) -> Self {
        Self { writer, stamp }
    }

    fn record(&self, event: &Event<'_>, spans: impl IntoIterator<Item = Map<String, Value>>) -> Value {
        let meta = event.metadata();
        let mut record = Map::new();
        record.insert("timestamp".to_string(), Value::String(timestamp()));
        record.insert("level".to_string(), Value::String(meta.level().as_str().to_lowercase()));
        record.insert("target".to_string(), Value::String(meta.target().to_string()));
        record.extend(self.stamp.clone());
        for fields in spans {
            record.extend(fields);
        }
        let mut fields = Fields::default();
        event.record(&mut fields);
        record.extend(fields.0);
        Value::Object(record)
    }
}

impl<S, W> tracing_subscriber::Layer<S> for RunLogLayer<W>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: LayerContext<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let mut fields = Fields::default();
            attrs.record(&mut fields);
            span.extensions_mut().insert(fields);
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: LayerContext<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let mut extensions = span.extensions_mut();
            match extensions.get_mut::<Fields>() {
                Some(fields) => values.record(fields),
                None => {
                    let mut fields = Fields::default();
                    values.record(&mut fields);
                    extensions.insert(fields);
                }
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: LayerContext<'_, S>) {
        let spans: Vec<Map<String, Value>> = ctx
            .event_scope(event)
            .into_iter()
            .flat_map(|scope| scope.from_root())
            .filter_map(|span| span.extensions().get::<Fields>().map(|f| f.0.clone()))
            .collect();
        let record = self.record(event, spans);

        let mut writer = self.writer.make_writer();
        if serde_json::to_writer(&mut writer, &record).is_ok() {
            let _ = writer.write_all(b"\n");
        }
    }
}

/// Field values collected from a span or event.
#[derive(Clone, Debug, Default)]
struct Fields(Map<String, Value>);

impl Fields {
    fn put(&mut self, field: &Field, value: Value) {
        self.0.insert(field.name().to_string(), value);
    }
}

impl Visit for Fields {
    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(number) = serde_json::Number::from_f64(value) {
            self.put(field, Value::Number(number));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, Value::String(format!("{value:?}")));
    }
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ============================================================================
// Log location
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
struct LogTarget {
    dir: PathBuf,
    file_name: String,
}

fn file_writer(config_dir: Option<&Path>) -> Result<(NonBlocking, WorkerGuard)> {
    let target = log_target(
        std::env::var_os(ENV_LOG_PATH).map(PathBuf::from),
        std::env::var_os(ENV_LOG_DIR).map(PathBuf::from),
        config_dir.map(Path::to_path_buf),
        default_log_dir(),
    )?;
    open_append(&target)?;
    let appender = tracing_appender::rolling::daily(&target.dir, &target.file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// The user's data directory, e.g. `~/.local/share/orgstats/logs`.
fn default_log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_local_dir().join("logs"))
}

/// Pick the log file: explicit path, then directory overrides in order,
/// then the data directory.
fn log_target(
    path: Option<PathBuf>,
    env_dir: Option<PathBuf>,
    config_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
) -> Result<LogTarget> {
    if let Some(path) = path {
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            bail!("{ENV_LOG_PATH} must end in a UTF-8 file name");
        };
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        return Ok(LogTarget {
            dir: dir.to_path_buf(),
            file_name: file_name.to_string(),
        });
    }

    let Some(dir) = env_dir.or(config_dir).or(data_dir) else {
        bail!("no log directory: set {ENV_LOG_DIR} or `log_dir`");
    };
    Ok(LogTarget {
        dir,
        file_name: format!("{APP_NAME}.jsonl"),
    })
}

fn open_append(target: &LogTarget) -> Result<()> {
    std::fs::create_dir_all(&target.dir)
        .with_context(|| format!("cannot create log directory {}", target.dir.display()))?;
    let path = target.dir.join(&target.file_name);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("cannot open log file {}", path.display()))?;
    Ok(())
}
