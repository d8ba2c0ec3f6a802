//! Concrete log sink forwarder: the HTTP-posting half of
//! `zane_common::log::LogRecorder`, paired with `LogSinkLayer` in `main.rs`.
//! Callers push onto an unbounded channel and return immediately; a single
//! background task drains it and posts each event on.

use std::time::Duration;

use reqwest::Client;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::sleep;
use tracing::warn;
use zane_common::log::{LogEvent, LogRecorder};

const MAX_POST_ATTEMPTS: u32 = 3;

pub struct HttpLogSink {
    sender: UnboundedSender<LogEvent>,
}

impl HttpLogSink {
    /// Spawns the background forwarder and returns a handle callers can hand
    /// to `LogSinkLayer::new`. When `sink_url` is `None` events are drained
    /// and discarded, so installing the layer is never conditional on a
    /// sink actually being configured.
    pub fn spawn(http: Client, sink_url: Option<String>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(forward_loop(http, sink_url, receiver));
        Self { sender }
    }
}

impl LogRecorder for HttpLogSink {
    fn record(&self, event: LogEvent) {
        // Best-effort: a full channel can't happen (unbounded), a closed one
        // means the forwarder task died and there's nowhere to report that.
        let _ = self.sender.send(event);
    }
}

async fn forward_loop(http: Client, sink_url: Option<String>, mut receiver: UnboundedReceiver<LogEvent>) {
    let Some(sink_url) = sink_url else {
        while receiver.recv().await.is_some() {}
        return;
    };

    while let Some(event) = receiver.recv().await {
        if let Err(err) = post_with_retry(&http, &sink_url, &event).await {
            warn!(%err, "dropping log event, log sink unreachable after retries");
        }
    }
}

async fn post_with_retry(http: &Client, sink_url: &str, event: &LogEvent) -> reqwest::Result<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match http.post(sink_url).json(event).send().await.and_then(|r| r.error_for_status()) {
            Ok(_) => return Ok(()),
            Err(err) if attempt >= MAX_POST_ATTEMPTS => return Err(err),
            Err(_) => sleep(Duration::from_millis(200 * attempt as u64)).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use zane_common::log::Level;

    use super::*;

    fn sample_event() -> LogEvent {
        LogEvent {
            deployment_id: Some("dep_1".to_string()),
            service_id: Some("svc_1".to_string()),
            level: Level::Info,
            source: "zane_orchestrator::deployment::workflow".to_string(),
            message: "step completed".to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn record_forwards_event_to_sink() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(1).mount(&server).await;

        let sink = HttpLogSink::spawn(Client::new(), Some(server.uri()));
        sink.record(sample_event());

        // Give the background task a moment to drain the channel and post.
        tokio::time::sleep(Duration::from_millis(100)).await;
        server.verify().await;
    }

    #[tokio::test]
    async fn record_without_sink_url_is_silently_discarded() {
        let sink = HttpLogSink::spawn(Client::new(), None);
        sink.record(sample_event());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
