//! Lets a [`LogSink`] back the `log` facade, so `log::info!` and friends
//! from anywhere in the process end up in the same destinations.

use log::kv::{self, Key, VisitSource};
use log::{Log, Metadata, Record, SetLoggerError};
use serde_json::Value;

use crate::record::Attributes;
use crate::sink::LogSink;

struct Collect<'a>(&'a mut Attributes);

impl<'kvs> VisitSource<'kvs> for Collect<'_> {
    fn visit_pair(&mut self, key: Key<'kvs>, value: kv::Value<'kvs>) -> Result<(), kv::Error> {
        self.0.insert(key.as_str(), to_json(&value));
        Ok(())
    }
}

fn to_json(value: &kv::Value<'_>) -> Value {
    if let Some(v) = value.to_bool() {
        Value::from(v)
    } else if let Some(v) = value.to_i64() {
        Value::from(v)
    } else if let Some(v) = value.to_u64() {
        Value::from(v)
    } else if let Some(v) = value.to_f64() {
        Value::from(v)
    } else {
        Value::from(value.to_string())
    }
}

impl LogSink {
    /// Register a clone of this sink as the global `log` logger.
    ///
    /// `log::max_level` is set to the configured level and kept in sync by
    /// [`reconfigure`](LogSink::reconfigure).
    pub fn install(&self) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(self.clone()))?;
        self.mark_installed();
        Ok(())
    }
}

impl Log for LogSink {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        LogSink::enabled(self, metadata.level())
    }

    fn log(&self, record: &Record<'_>) {
        if !Log::enabled(self, record.metadata()) {
            return;
        }

        let mut attributes = Attributes::new();
        let _ = record.key_values().visit(&mut Collect(&mut attributes));
        attributes.insert("target", record.target());

        LogSink::log(self, record.level(), &record.args().to_string(), attributes);
    }

    fn flush(&self) {
        LogSink::flush(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::record::STACK_TRACE_KEY;
    use crate::testing::{Buffer, json_sink};
    use log::{Level, LevelFilter};

    #[test]
    fn test_log_record_key_values_become_attributes() {
        let buffer = Buffer::default();
        let sink = LogSink::with_writer(&Config::default().format("json"), buffer.clone());

        let kvs: [(&str, kv::Value); 4] = [
            ("user", kv::Value::from("alice")),
            ("attempts", kv::Value::from(3u64)),
            ("ratio", kv::Value::from(0.5f64)),
            ("admin", kv::Value::from(false)),
        ];
        let kvs = kvs.as_slice();
        Log::log(
            &sink,
            &Record::builder()
                .args(format_args!("login"))
                .level(Level::Warn)
                .target("auth")
                .key_values(&kvs)
                .build(),
        );
        Log::log(
            &sink,
            &Record::builder()
                .args(format_args!("hidden"))
                .level(Level::Debug)
                .build(),
        );

        let records = buffer.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["message"], "login");
        assert_eq!(records[0]["level"], "warn");
        assert_eq!(records[0]["target"], "auth");
        assert_eq!(records[0]["user"], "alice");
        assert_eq!(records[0]["attempts"], 3);
        assert_eq!(records[0]["ratio"], 0.5);
        assert_eq!(records[0]["admin"], false);
    }

    #[test]
    fn test_error_records_through_facade_carry_stack_trace() {
        let buffer = Buffer::default();
        let sink = LogSink::with_writer(&Config::default().format("json"), buffer.clone());

        Log::log(
            &sink,
            &Record::builder()
                .args(format_args!("boom"))
                .level(Level::Error)
                .build(),
        );

        let records = buffer.records();
        assert!(records[0][STACK_TRACE_KEY].is_string());
        assert!(Log::enabled(
            &sink,
            &Metadata::builder().level(Level::Info).build()
        ));
    }

    // the only test registering a global logger
    #[test]
    fn test_install_keeps_max_level_in_sync() {
        let (sink, buffer) = json_sink("info");
        sink.install().unwrap();
        assert_eq!(log::max_level(), LevelFilter::Info);

        sink.reconfigure_or(&Config::default().format("json").level("debug"), Buffer::default());
        assert_eq!(log::max_level(), LevelFilter::Debug);

        sink.reconfigure_or(&Config::default().format("json").level("error"), Buffer::default());
        assert_eq!(log::max_level(), LevelFilter::Error);
        assert!(buffer.records().is_empty());
    }
}
