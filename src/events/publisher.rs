//! Fire-and-forget event publishing.
//!
//! `publish` only enqueues. A single drain task owns delivery, so a slow or
//! dead sink can fill the queue but never stall a request; once the queue is
//! full new events are dropped and counted.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::events::sink::{EventSink, GatewayEvent};
use crate::observability::metrics;

/// Cheaply cloneable publisher handle.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: Option<mpsc::Sender<GatewayEvent>>,
}

impl EventPublisher {
    /// Start the drain loop and return a handle feeding it.
    pub fn spawn(
        sink: Arc<dyn EventSink>,
        capacity: usize,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(drain(rx, sink, shutdown));
        (Self { tx: Some(tx) }, handle)
    }

    /// A publisher that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an event. Never blocks and never fails the caller.
    pub fn publish(&self, event_type: &str, details: impl Into<serde_json::Value>, service: &str) {
        let Some(tx) = &self.tx else {
            return;
        };

        let event = GatewayEvent {
            chaos_type: event_type.to_string(),
            details: details.into(),
            service: service.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(event_type = %event.chaos_type, "Event queue full, dropping event");
                metrics::record_event_dropped("queue_full");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::warn!(event_type = %event.chaos_type, "Event publisher stopped, dropping event");
                metrics::record_event_dropped("closed");
            }
        }
    }
}

async fn drain(
    mut rx: mpsc::Receiver<GatewayEvent>,
    sink: Arc<dyn EventSink>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::debug!("Event publisher started");
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                if let Err(e) = sink.send(&event).await {
                    tracing::error!(
                        event_type = %event.chaos_type,
                        service = %event.service,
                        error = %e,
                        "Failed to publish event"
                    );
                    metrics::record_event_dropped("delivery_failed");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Event publisher received shutdown signal, exiting loop");
                break;
            }
        }
    }
}
