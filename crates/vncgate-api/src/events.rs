//! Registry change stream for remote observers (`GET /api/list/subscribe`).
//!
//! Each observer gets its own registry subscription, and the response stream
//! pulls straight from it: every [`ChangeEvent`] goes out as a server-sent
//! event named after its kind, carrying the target fingerprint as data. The
//! only buffering is the subscription's own queue. The liveness tick is the
//! SSE keep-alive write, so a vanished client shows up as a failed write
//! even while no events flow, and axum drops the stream. The stream also
//! ends when the registry drops the subscription or on server shutdown. The
//! subscription is released whenever the stream is dropped.

use crate::routes::AppState;
use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::stream::{self, BoxStream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use vncgate_kernel::{SubscriptionId, TargetRegistry};
use vncgate_types::event::ChangeEvent;

/// Fans registry events out to remote observers.
pub struct EventDistributor {
    registry: Arc<TargetRegistry>,
    liveness: Duration,
    shutdown: watch::Receiver<bool>,
}

/// Unsubscribes when dropped.
struct SubscriptionGuard {
    registry: Arc<TargetRegistry>,
    id: SubscriptionId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.registry.unsubscribe(self.id);
        debug!(subscription = ?self.id, "Observer detached");
    }
}

/// One attached observer: its subscription plus the shutdown flag.
struct Observer<F> {
    _guard: SubscriptionGuard,
    events: mpsc::Receiver<ChangeEvent>,
    shutdown: watch::Receiver<bool>,
    render: F,
}

impl<F> Observer<F> {
    async fn next_event(&mut self) -> Option<ChangeEvent> {
        loop {
            let stopping = *self.shutdown.borrow_and_update();
            if stopping {
                return None;
            }
            tokio::select! {
                event = self.events.recv() => return event,
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

impl EventDistributor {
    pub fn new(
        registry: Arc<TargetRegistry>,
        liveness: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            liveness,
            shutdown,
        }
    }

    /// Interval between keep-alive writes on an idle stream.
    pub fn liveness(&self) -> Duration {
        self.liveness
    }

    /// Subscribe a new observer, rendering each event with `render`.
    ///
    /// The subscription exists by the time this returns, so no event published
    /// afterwards can be missed for lack of a subscriber.
    pub fn attach<T, F>(&self, render: F) -> BoxStream<'static, T>
    where
        T: Send + 'static,
        F: Fn(&ChangeEvent) -> T + Send + 'static,
    {
        let subscription = self.registry.subscribe();
        debug!(subscription = ?subscription.id, "Observer attached");
        let observer = Observer {
            _guard: SubscriptionGuard {
                registry: Arc::clone(&self.registry),
                id: subscription.id,
            },
            events: subscription.events,
            shutdown: self.shutdown.clone(),
            render,
        };

        stream::unfold(observer, |mut observer| async move {
            let event = observer.next_event().await?;
            let item = (observer.render)(&event);
            Some((item, observer))
        })
        .boxed()
    }

    /// Observer stream in server-sent-event form.
    pub fn attach_sse(&self) -> BoxStream<'static, Result<SseEvent, Infallible>> {
        self.attach(|event| Ok(to_sse(event)))
    }
}

/// `event: <kind>` / `data: <fingerprint hex>`.
pub fn to_sse(event: &ChangeEvent) -> SseEvent {
    SseEvent::default()
        .event(event.kind.as_str())
        .data(event.fingerprint.to_hex())
}

/// `GET /api/list/subscribe`: long-lived change stream.
pub async fn subscribe(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Sse::new(state.events.attach_sse())
        .keep_alive(KeepAlive::new().interval(state.events.liveness()))
}
