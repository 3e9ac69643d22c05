//! Live updates for open child sessions.
//!
//! Handlers publish after their store write has committed. Each SSE subscriber
//! receives only the events of the child in its path.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use habitquest_shared::api::ServerEvent;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, trace, warn};

use super::AppState;

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<ServerEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: ServerEvent) {
        let child_id = event.child_id().to_string();
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => debug!(child_id = %child_id, event = name, receivers, "event published"),
            Err(_) => trace!(child_id = %child_id, event = name, "event dropped: no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }
}

fn to_sse(
    child_id: &str,
    msg: Result<ServerEvent, BroadcastStreamRecvError>,
) -> Option<Result<Event, Infallible>> {
    let event = match msg {
        Ok(ev) => ev,
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            warn!(child_id, skipped = n, "sse: subscriber lagged");
            return None;
        }
    };
    if event.child_id() != child_id {
        return None;
    }
    match Event::default().event(event.name()).json_data(&event) {
        Ok(ev) => Some(Ok(ev)),
        Err(e) => {
            warn!(child_id, error = %e, "sse: failed to encode event");
            None
        }
    }
}

pub(super) async fn api_child_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(child_id = %id, "sse: subscriber connected");
    let rx = state.events.subscribe();
    let shutdown = state.shutdown_token();
    let stream = BroadcastStream::new(rx)
        .filter_map(move |msg| futures::future::ready(to_sse(&id, msg)))
        .take_until(shutdown.cancelled_owned());
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_published_events() {
        let notifier = Notifier::new(4);
        let mut rx = notifier.subscribe();
        notifier.publish(ServerEvent::BalanceChanged {
            child_id: "c1".into(),
            coin_balance: 42,
        });
        match rx.recv().await.unwrap() {
            ServerEvent::BalanceChanged { coin_balance, .. } => assert_eq!(coin_balance, 42),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn other_children_are_filtered_out() {
        let ev = ServerEvent::BalanceChanged {
            child_id: "c2".into(),
            coin_balance: 1,
        };
        assert!(to_sse("c1", Ok(ev.clone())).is_none());
        assert!(to_sse("c2", Ok(ev)).is_some());
        assert!(to_sse("c1", Err(BroadcastStreamRecvError::Lagged(3))).is_none());
    }
}
