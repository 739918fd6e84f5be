//! Actix-web middleware that tags every request with a trace identifier and
//! logs its lifecycle through a leveled, structured log sink.
//!
//! # Examples:
//! ## Logging requests to standard output
//! ```bash
//! cargo add actix-web-middleware-tracelog
//! ```
//! ```rust,no_run
//! use actix_web::{web, App, HttpServer};
//! use actix_web_middleware_tracelog::{Config, LogSink, TraceId, TraceLogger};
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     let sink = LogSink::new(&Config::default().format("json").level("info"));
//!
//!     HttpServer::new(move || {
//!         App::new()
//!             .wrap(TraceLogger::new(sink.clone()))
//!             .route("/", web::get().to(|trace_id: TraceId| async move {
//!                 format!("hello from {trace_id}")
//!             }))
//!     })
//!     .bind("127.0.0.1:8080")?;
//!     Ok(())
//! }
//! ```
//! A request carrying `X-Trace-ID: abc-123` produces:
//! ```json
//! {"time":"2025-03-01T10:00:00.1Z","level":"info","message":"Incoming request","trace_id":"abc-123","method":"GET","path":"/","remote_ip":"127.0.0.1:52100"}
//! {"time":"2025-03-01T10:00:00.2Z","level":"info","message":"Request completed","trace_id":"abc-123","duration":0.000412,"status":200}
//! ```
//!
//! ## Rotating log files and extra destinations
//! ```rust,no_run
//! use actix_web_middleware_tracelog::{Attributes, Config, LogSink};
//!
//! let sink = LogSink::new(
//!     &Config::default()
//!         .log_file("/var/log/api/api.log")
//!         .max_size(100)
//!         .max_backups(7)
//!         .max_age(30),
//! );
//! sink.add_sink(Some(std::io::stderr())).unwrap();
//! sink.error("payment gateway unreachable", Attributes::new().with("retries", 3));
//! ```
//!
//! ## Using the `log` facade
//! ```rust
//! use actix_web_middleware_tracelog::LogSink;
//!
//! let sink = LogSink::default();
//! if sink.install().is_ok() {
//!     log::info!(user = "alice"; "signed in");
//! }
//! ```
//!
//! # Features
//! - Trace identifier propagated from `X-Trace-ID` or generated (UUID v4 or v7)
//! - `Incoming request` / `Request completed` records with status and duration
//! - JSON or text records, level filtering with a safe fallback to info
//! - Size based file rotation with compressed backups
//! - Fan-out to additional writers with per-destination failure isolation
//! - Error records always carry a `stack_trace`
//! - Pattern-based path exclusion
//!
//! # Configuration
//!
//! ## Logger
//!
//! | option        | values                             | default  |
//! |---------------|------------------------------------|----------|
//! | `format`      | `json`, `text`                     | `text`   |
//! | `level`       | `trace`, `debug`, `info`, `warn`, `error` | `info` |
//! | `log_file`    | path, empty for stdout             | stdout   |
//! | `max_size`    | megabytes before rotation          | 100      |
//! | `max_backups` | rotated files kept, 0 for all      | 0        |
//! | `max_age`     | days kept when `max_backups` is 0  | 0        |
//!
//! [`Config::from_env`] reads the same options from `LOG_FORMAT`, `LOG_LEVEL`,
//! `LOG_FILE`, `LOG_MAX_SIZE`, `LOG_MAX_BACKUPS` and `LOG_MAX_AGE`.
//!
//! ## Extra Fields
//!
//! ```rust
//! use actix_web_middleware_tracelog::{Fields, LogSink, TraceLogger};
//!
//! let logger = TraceLogger::new(LogSink::default())
//!     .fields(
//!         Fields::builder()
//!             .with_user_agent()              // Client user agent
//!             .with_size()                    // Response size in bytes
//!             .with_response_header("content-type")
//!             .build(),
//!     )
//!     .exclude("/health")
//!     .exclude_regex(r"^/assets/.*");
//! ```
//!
//! # Feature Flags
//!
//! - `uuid_v4` (default) - Generate UUIDv4 trace identifiers
//! - `uuid_v7` - Use UUIDv7 instead of UUIDv4 for trace identifiers

mod bridge;
mod config;
mod error;
mod middleware;
mod observer;
mod record;
mod sink;
#[cfg(test)]
mod testing;
mod trace;

pub use crate::config::{Config, Format};
pub use crate::error::{Error, Result};
pub use crate::middleware::{
    Field, Fields, FieldsBuilder, TraceLogger, TraceLoggerMiddlewareService, TraceLoggerResponse,
};
pub use crate::observer::{StatusObserver, TracedBody};
pub use crate::record::{Attributes, STACK_TRACE_KEY};
pub use crate::sink::LogSink;
pub use crate::trace::{TRACE_ID_HEADER, TraceId};
