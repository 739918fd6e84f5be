use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::config::Config;
use crate::sink::LogSink;

/// In-memory writer shared between a sink and the test reading it back.
#[derive(Clone, Default)]
pub(crate) struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Buffer {
    pub(crate) fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    /// Every line written so far, parsed as a JSON record.
    pub(crate) fn records(&self) -> Vec<Value> {
        self.text()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

/// JSON sink at `level` writing into a fresh [`Buffer`].
pub(crate) fn json_sink(level: &str) -> (LogSink, Buffer) {
    let buffer = Buffer::default();
    let sink = LogSink::with_writer(
        &Config::default().format("json").level(level),
        buffer.clone(),
    );
    (sink, buffer)
}
