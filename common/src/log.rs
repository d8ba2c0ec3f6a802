//! A [tracing_subscriber::Layer] that tags every log event
//! emitted from inside a deployment/environment span with `deployment_id`/
//! `service_id` and hands it to a [`LogRecorder`], instead of threading a
//! sink handle through every activity function by hand.
//!
//! Spans tagged with the identifiers we care about install a marker
//! extension on `on_new_span`; `on_event` then walks the current span scope
//! looking for that marker and forwards the event to the recorder.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::{span, Metadata, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<&tracing::Level> for Level {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::ERROR => Self::Error,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A single structured log line, tagged with the deployment/service it came
/// from (when known) and which internal component produced it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEvent {
    pub deployment_id: Option<String>,
    pub service_id: Option<String>,
    pub level: Level,
    /// What produced the line: a tracing target (`zane_orchestrator::deployment::workflow`)
    /// for ambient instrumentation, or a fixed label (`build`) for activities
    /// that stream their own external process output.
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Receives every captured [`LogEvent`]. Implementations are expected to be
/// cheap and non-blocking — queue to a channel rather than doing I/O inline.
pub trait LogRecorder: Send + Sync {
    fn record(&self, event: LogEvent);
}

impl<T: LogRecorder + ?Sized> LogRecorder for std::sync::Arc<T> {
    fn record(&self, event: LogEvent) {
        (**self).record(event)
    }
}

/// Tracing subscriber layer that forwards events inside a tagged span to a
/// [`LogRecorder`].
pub struct LogSinkLayer<R> {
    recorder: R,
}

impl<R> LogSinkLayer<R> {
    pub fn new(recorder: R) -> Self {
        Self { recorder }
    }
}

#[derive(Default, Clone)]
struct ScopeIds {
    deployment_id: Option<String>,
    service_id: Option<String>,
}

#[derive(Default)]
struct ScopeIdsVisitor {
    ids: ScopeIds,
}

impl ScopeIdsVisitor {
    fn is_valid(metadata: &Metadata) -> bool {
        metadata.is_span() && metadata.fields().field("deployment_id").is_some()
    }
}

impl Visit for ScopeIdsVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "deployment_id" => self.ids.deployment_id = Some(format!("{value:?}").trim_matches('"').to_string()),
            "service_id" => self.ids.service_id = Some(format!("{value:?}").trim_matches('"').to_string()),
            _ => {}
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}").trim_matches('"').to_string();
        } else if !self.message.is_empty() {
            self.message.push_str(&format!(" {}={value:?}", field.name()));
        } else {
            self.message = format!("{}={value:?}", field.name());
        }
    }
}

impl<S, R> Layer<S> for LogSinkLayer<R>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    R: LogRecorder + 'static,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if !ScopeIdsVisitor::is_valid(attrs.metadata()) {
            return;
        }
        let mut visitor = ScopeIdsVisitor::default();
        attrs.record(&mut visitor);

        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(visitor.ids);
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let Some(scope) = ctx.event_scope(event) else {
            return;
        };

        for span in scope.from_root() {
            let extensions = span.extensions();
            let Some(ids) = extensions.get::<ScopeIds>() else {
                continue;
            };

            let mut visitor = MessageVisitor::default();
            event.record(&mut visitor);

            self.recorder.record(LogEvent {
                deployment_id: ids.deployment_id.clone(),
                service_id: ids.service_id.clone(),
                level: event.metadata().level().into(),
                source: event.metadata().target().to_string(),
                message: visitor.message,
                timestamp: Utc::now(),
            });
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_from_tracing_level_round_trips_display() {
        assert_eq!(Level::from(&tracing::Level::WARN).to_string(), "warn");
        assert_eq!(Level::from(&tracing::Level::ERROR).to_string(), "error");
    }
}
