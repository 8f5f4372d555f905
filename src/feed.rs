//! Real-time feed of finished analyses, served as server-sent events.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
};
use chrono::{DateTime, Utc};
use futures::Stream;
use metrics::gauge;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::debug;

use crate::analyze::record::ProcessingModel;
use crate::analyze::topic::Topic;
use crate::api::AppState;
use crate::store::StoredArticle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub key: String,
    pub title: String,
    pub source: String,
    pub topic: Topic,
    pub bias_score: f32,
    pub misinformation_risk: f32,
    pub credibility_score: f32,
    pub processing_model: ProcessingModel,
    pub timestamp: DateTime<Utc>,
}

impl From<&StoredArticle> for FeedEvent {
    fn from(a: &StoredArticle) -> Self {
        Self {
            key: a.key.clone(),
            title: a.title.clone(),
            source: a.source.clone(),
            topic: a.topic,
            bias_score: a.analysis.bias.overall_score,
            misinformation_risk: a.analysis.misinformation.risk_score,
            credibility_score: a.analysis.credibility.overall_score,
            processing_model: a.analysis.processing_model,
            timestamp: a.timestamp,
        }
    }
}

/// Cheap to clone; every clone publishes into the same channel.
#[derive(Clone)]
pub struct FeedHub {
    tx: broadcast::Sender<FeedEvent>,
}

impl FeedHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many subscribers saw the event. No subscribers is not an error.
    pub fn publish(&self, event: FeedEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        let rx = self.tx.subscribe();
        gauge!("feed_subscribers").set(self.tx.receiver_count() as f64);
        rx
    }

    /// SSE event stream for one client; the gauge is refreshed when it is dropped.
    pub fn stream(&self) -> FeedStream {
        let inner = Box::pin(event_stream(self.subscribe()));
        FeedStream {
            inner,
            _guard: SubscriberGuard {
                tx: self.tx.clone(),
            },
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Events that arrive while a client is lagging are skipped, not buffered.
pub fn event_stream(
    rx: broadcast::Receiver<FeedEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx)
        .filter_map(|msg| match msg {
            Ok(ev) => Event::default().event("analysis").json_data(&ev).ok(),
            Err(lagged) => {
                debug!(error = %lagged, "feed subscriber lagged");
                None
            }
        })
        .map(Ok)
}

struct SubscriberGuard {
    tx: broadcast::Sender<FeedEvent>,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        gauge!("feed_subscribers").set(self.tx.receiver_count() as f64);
    }
}

/// Fields drop in order: the receiver goes before the guard counts.
pub struct FeedStream {
    inner: Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>,
    _guard: SubscriberGuard,
}

impl Stream for FeedStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

pub async fn feed_handler(State(state): State<AppState>) -> Sse<KeepAliveStream<FeedStream>> {
    Sse::new(state.feed.stream()).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::record::AnalysisRecord;
    use crate::store::ProcessingStatus;

    fn event(key: &str) -> FeedEvent {
        let a = StoredArticle {
            key: key.into(),
            title: "t".into(),
            content: "c".into(),
            source: "s".into(),
            url: None,
            topic: Topic::General,
            timestamp: Utc::now(),
            embedding: vec![],
            processing_status: ProcessingStatus::AnalyzedFallback,
            updated_at: None,
            analysis: AnalysisRecord::neutral(ProcessingModel::FallbackHeuristic),
        };
        FeedEvent::from(&a)
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let hub = FeedHub::new(8);
        assert_eq!(hub.publish(event("none")), 0);
        let mut rx = hub.subscribe();
        assert_eq!(hub.publish(event("k1")), 1);
        assert_eq!(rx.recv().await.unwrap().key, "k1");
    }

    #[test]
    fn gauge_follows_dropped_streams() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            let hub = FeedHub::new(4);
            let first = hub.stream();
            let second = hub.stream();
            assert_eq!(hub.subscriber_count(), 2);
            drop(first);
            drop(second);
            assert_eq!(hub.subscriber_count(), 0);
        });
        let text = handle.render();
        assert!(text.contains("feed_subscribers 0"), "{text}");
    }

    #[tokio::test]
    async fn lagged_stream_skips_and_continues() {
        let hub = FeedHub::new(2);
        let rx = hub.subscribe();
        for k in ["a", "b", "c", "d"] {
            hub.publish(event(k));
        }
        drop(hub);
        let events: Vec<_> = event_stream(rx).collect().await;
        // two oldest overwritten, the lag marker dropped, the rest delivered
        assert_eq!(events.len(), 2);
    }
}
