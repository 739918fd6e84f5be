use std::{
    backtrace::Backtrace,
    fmt, fs,
    io::{self, Write},
    path::Path,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use file_rotate::{
    ContentLimit, FileRotate,
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
};
use log::Level;
use time::OffsetDateTime;

use crate::config::{Config, Format, resolve_level};
use crate::error::{Error, Result};
use crate::record::{Attributes, Record, STACK_TRACE_KEY};

const MEGABYTE: usize = 1024 * 1024;

type Writer = Box<dyn Write + Send>;

/// Handle to the process logger.
///
/// Cloning is cheap and every clone writes to the same destinations. Records
/// are rendered outside of the lock; a single mutex serializes the write of a
/// rendered line to all destinations, so concurrent callers never interleave.
///
/// # Examples
/// ```rust
/// use actix_web_middleware_tracelog::{Attributes, Config, LogSink};
///
/// let sink = LogSink::new(&Config::default().format("json").level("debug"));
/// sink.info("service started", Attributes::new().with("port", 8080));
/// sink.add_sink(Some(std::io::stderr())).unwrap();
/// ```
#[derive(Clone)]
pub struct LogSink(Arc<Inner>);

struct Inner {
    settings: RwLock<Settings>,
    output: Mutex<Output>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    installed: AtomicBool,
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    format: Format,
    level: Level,
}

struct Output {
    primary: Writer,
    extra: Vec<Writer>,
}

impl Output {
    /// Write `line` to every destination, collecting failures of the additional ones.
    fn write_line(&mut self, line: &[u8]) -> Vec<(usize, io::Error)> {
        // the primary destination has nowhere to report its own failure
        let _ = self.primary.write_all(line);

        self.extra
            .iter_mut()
            .enumerate()
            .filter_map(|(index, writer)| writer.write_all(line).err().map(|err| (index, err)))
            .collect()
    }
}

impl LogSink {
    /// Initialize a sink from `config`.
    ///
    /// An empty `log_file` writes to standard output, anything else to a size
    /// rotated, compressed file. A log file that cannot be created falls back
    /// to standard output with a warning naming the file and the error.
    pub fn new(config: &Config) -> LogSink {
        LogSink::open(config, io::stdout())
    }

    /// Initialize from `config`, writing to `fallback` when the log file is unusable.
    pub(crate) fn open<W>(config: &Config, fallback: W) -> LogSink
    where
        W: Write + Send + 'static,
    {
        match open_destination(config) {
            Ok(primary) => LogSink::build(config, primary),
            Err(err) => {
                let sink = LogSink::build(config, Box::new(fallback));
                sink.warn_destination_fallback(config, err);
                sink
            }
        }
    }

    /// Initialize a sink that writes to `writer` instead of the configured destination.
    pub fn with_writer<W>(config: &Config, writer: W) -> LogSink
    where
        W: Write + Send + 'static,
    {
        LogSink::build(config, Box::new(writer))
    }

    fn build(config: &Config, primary: Writer) -> LogSink {
        let resolved = resolve_level(&config.level);
        let sink = LogSink(Arc::new(Inner {
            settings: RwLock::new(Settings {
                format: Format::parse(&config.format),
                level: resolved.level,
            }),
            output: Mutex::new(Output {
                primary,
                extra: Vec::new(),
            }),
            pending: Mutex::new(Vec::new()),
            installed: AtomicBool::new(false),
        }));

        if let Some(rejected) = resolved.rejected {
            sink.warn_level_fallback(rejected);
        }
        sink
    }

    /// Replace the whole configuration, additional sinks included.
    ///
    /// When this sink backs the `log` facade, `log::max_level` follows the new
    /// level. An unusable log file falls back to standard output as in
    /// [`new`](Self::new).
    pub fn reconfigure(&self, config: &Config) {
        self.reconfigure_or(config, io::stdout());
    }

    pub(crate) fn reconfigure_or<W>(&self, config: &Config, fallback: W)
    where
        W: Write + Send + 'static,
    {
        let resolved = resolve_level(&config.level);
        let (primary, failure): (Writer, _) = match open_destination(config) {
            Ok(primary) => (primary, None),
            Err(err) => (Box::new(fallback), Some(err)),
        };

        {
            let mut output = lock(&self.0.output);
            output.primary = primary;
            output.extra.clear();
        }
        {
            let mut settings = self.0.settings.write().unwrap_or_else(PoisonError::into_inner);
            settings.format = Format::parse(&config.format);
            settings.level = resolved.level;
        }
        if self.0.installed.load(Ordering::Acquire) {
            log::set_max_level(resolved.level.to_level_filter());
        }

        if let Some(err) = failure {
            self.warn_destination_fallback(config, err);
        }
        if let Some(rejected) = resolved.rejected {
            self.warn_level_fallback(rejected);
        }
    }

    /// Record that this sink now backs the `log` facade and align `log::max_level`.
    pub(crate) fn mark_installed(&self) {
        self.0.installed.store(true, Ordering::Release);
        log::set_max_level(self.level().to_level_filter());
    }

    fn warn_destination_fallback(&self, config: &Config, err: io::Error) {
        self.warn(
            "log file unavailable, falling back to standard output",
            Attributes::new()
                .with("log_file", config.log_file.as_str())
                .with("error", err.to_string()),
        );
    }

    fn warn_level_fallback(&self, rejected: String) {
        self.warn(
            "unrecognized log level, falling back to info",
            Attributes::new().with("configured_level", rejected),
        );
    }

    /// Multiplex every following record to `writer` as well.
    ///
    /// Returns [`Error::InvalidSink`] when `writer` is absent; the existing
    /// destinations are left untouched in that case.
    pub fn add_sink<W>(&self, writer: Option<W>) -> Result<()>
    where
        W: Write + Send + 'static,
    {
        let writer = writer.ok_or(Error::InvalidSink)?;
        lock(&self.0.output).extra.push(Box::new(writer));
        Ok(())
    }

    /// Minimum level a record needs to be written.
    pub fn level(&self) -> Level {
        self.settings().level
    }

    pub fn format(&self) -> Format {
        self.settings().format
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level()
    }

    pub fn debug(&self, message: &str, attributes: Attributes) {
        self.log(Level::Debug, message, attributes);
    }

    pub fn info(&self, message: &str, attributes: Attributes) {
        self.log(Level::Info, message, attributes);
    }

    pub fn warn(&self, message: &str, attributes: Attributes) {
        self.log(Level::Warn, message, attributes);
    }

    /// Log at error level. The record always carries a `stack_trace`
    /// attribute with the call stack of the caller.
    pub fn error(&self, message: &str, attributes: Attributes) {
        self.log(Level::Error, message, attributes);
    }

    /// Log at `level`. Error records get a `stack_trace` attribute.
    pub fn log(&self, level: Level, message: &str, mut attributes: Attributes) {
        if level == Level::Error {
            attach_stack_trace(&mut attributes);
        }
        self.emit(level, message, &attributes);
    }

    /// Log on a detached thread so the caller never waits for I/O.
    ///
    /// There is no ordering guarantee against other log calls. Records still
    /// in flight when the process exits are lost unless [`flush`](Self::flush)
    /// is called first.
    pub fn log_async(&self, level: Level, message: impl Into<String>, mut attributes: Attributes) {
        if level == Level::Error {
            attach_stack_trace(&mut attributes);
        }

        let sink = self.clone();
        let message = message.into();
        let handle = thread::spawn(move || sink.emit(level, &message, &attributes));

        let mut pending = lock(&self.0.pending);
        pending.retain(|handle| !handle.is_finished());
        pending.push(handle);
    }

    /// Wait for outstanding [`log_async`](Self::log_async) calls and flush
    /// every destination.
    pub fn flush(&self) {
        let pending = std::mem::take(&mut *lock(&self.0.pending));
        for handle in pending {
            let _ = handle.join();
        }

        let mut output = lock(&self.0.output);
        let _ = output.primary.flush();
        for writer in &mut output.extra {
            let _ = writer.flush();
        }
    }

    pub(crate) fn emit(&self, level: Level, message: &str, attributes: &Attributes) {
        let settings = self.settings();
        if level > settings.level {
            return;
        }

        let line = Record {
            level,
            message,
            attributes,
            time: OffsetDateTime::now_utc(),
        }
        .render(settings.format);

        let failures = lock(&self.0.output).write_line(&line);
        if failures.is_empty() || Level::Warn > settings.level {
            return;
        }

        for (index, err) in failures {
            let attributes = Attributes::new()
                .with("sink", index)
                .with("error", err.to_string());
            let line = Record {
                level: Level::Warn,
                message: "log sink write failed",
                attributes: &attributes,
                time: OffsetDateTime::now_utc(),
            }
            .render(settings.format);

            let _ = lock(&self.0.output).primary.write_all(&line);
        }
    }

    fn settings(&self) -> Settings {
        *self.0.settings.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LogSink {
    /// Text records of level info and above to standard output.
    fn default() -> Self {
        LogSink::new(&Config::default())
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settings = self.settings();
        f.debug_struct("LogSink")
            .field("format", &settings.format)
            .field("level", &settings.level)
            .finish_non_exhaustive()
    }
}

fn attach_stack_trace(attributes: &mut Attributes) {
    let trace = Backtrace::force_capture().to_string();
    let trace = if trace.trim().is_empty() {
        "<unavailable>".to_string()
    } else {
        trace
    };
    attributes.insert(STACK_TRACE_KEY, trace);
}

fn open_destination(config: &Config) -> io::Result<Writer> {
    match config.destination() {
        None => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(rotating_file(&path, config)?)),
    }
}

fn rotating_file(path: &Path, config: &Config) -> io::Result<FileRotate<AppendTimestamp>> {
    // FileRotate panics when it cannot create the directory or the file
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::OpenOptions::new().create(true).append(true).open(path)?;

    Ok(FileRotate::new(
        path,
        AppendTimestamp::default(file_limit(config)),
        ContentLimit::BytesSurpassed(content_limit(config)),
        Compression::OnRotate(0),
        #[cfg(unix)]
        None,
    ))
}

/// Backups win over age; with neither set every rotated file is kept.
fn file_limit(config: &Config) -> FileLimit {
    if config.max_backups > 0 {
        FileLimit::MaxFiles(config.max_backups)
    } else if config.max_age > 0 {
        FileLimit::Age(chrono::Duration::days(i64::from(config.max_age)))
    } else {
        FileLimit::Unlimited
    }
}

fn content_limit(config: &Config) -> usize {
    config.max_size.max(1).saturating_mul(MEGABYTE)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
