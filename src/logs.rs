//! Bounded in-memory log ring buffer feeding the `/api/logs` control surface endpoint.
//!
//! Modeled as a ring-buffer behind an interface tasks hold by reference rather than a
//! process-wide mutable global; the `tracing_subscriber::Layer` impl below pushes a
//! formatted line per event, and handlers read an immutable snapshot.

use std::collections::VecDeque;
use std::sync::Mutex;

use time::OffsetDateTime;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

const DEFAULT_CAPACITY: usize = 500;

/// A bounded ring of the last `capacity` formatted log lines, guarded by a mutex.
#[derive(Debug)]
pub struct LogBuffer {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Returns a snapshot of the last `limit` lines (most recent last), or all of them
    /// if `limit` is `None`.
    pub fn snapshot(&self, limit: Option<usize>) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        match limit {
            Some(n) if n < lines.len() => lines.iter().skip(lines.len() - n).cloned().collect(),
            _ => lines.iter().cloned().collect(),
        }
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        }
    }
}

impl<S> Layer<S> for std::sync::Arc<LogBuffer>
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor { message: None };
        event.record(&mut visitor);

        let level = level_label(event.metadata().level());
        let target = event.metadata().target();
        let message = visitor.message.unwrap_or_default();
        let timestamp = OffsetDateTime::now_utc();

        self.push(format!(
            "{} {level:>5} {target}: {message}",
            timestamp
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "????-??-??T??:??:??Z".to_string())
        ));
    }
}

fn level_label(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "TRACE",
        Level::DEBUG => "DEBUG",
        Level::INFO => "INFO",
        Level::WARN => "WARN",
        Level::ERROR => "ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_evicts_oldest() {
        let buf = LogBuffer::with_capacity(3);
        buf.push("a".into());
        buf.push("b".into());
        buf.push("c".into());
        buf.push("d".into());
        assert_eq!(buf.snapshot(None), vec!["b", "c", "d"]);
    }

    #[test]
    fn snapshot_respects_limit() {
        let buf = LogBuffer::with_capacity(10);
        for line in ["a", "b", "c"] {
            buf.push(line.into());
        }
        assert_eq!(buf.snapshot(Some(2)), vec!["b", "c"]);
    }
}
