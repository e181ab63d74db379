//! Per-subscriber queue entries for the trading engine.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::WsError;
use crate::stream::{ERR_BUFFER, STREAM_BUFFER};
use crate::ws::events::{Channel, EventType};

/// One subscriber's bounded queue plus its match predicate.
///
/// The engine's index owns the entry; dispatch snapshots hold short-lived
/// clones. `try_send` touches only the entry's own atomic and a non-blocking
/// channel push, so it can never re-enter an engine lock or block a read
/// loop behind a slow consumer.
pub(crate) struct SubscriptionEntry<E> {
    pub id: String,
    pub channel: Channel,
    pub event_type: EventType,
    assets: HashSet<String>,
    markets: HashSet<String>,
    tx: mpsc::Sender<E>,
    err_tx: mpsc::Sender<WsError>,
    closed: AtomicBool,
}

impl<E> SubscriptionEntry<E> {
    pub fn new(
        id: String,
        channel: Channel,
        event_type: EventType,
        assets: &[String],
        markets: &[String],
    ) -> (Arc<Self>, mpsc::Receiver<E>, mpsc::Receiver<WsError>) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (err_tx, err_rx) = mpsc::channel(ERR_BUFFER);
        let entry = Arc::new(Self {
            id,
            channel,
            event_type,
            assets: assets.iter().cloned().collect(),
            markets: markets.iter().cloned().collect(),
            tx,
            err_tx,
            closed: AtomicBool::new(false),
        });
        (entry, rx, err_rx)
    }

    /// Empty filter set matches everything.
    pub fn matches_asset(&self, asset_id: &str) -> bool {
        self.assets.is_empty() || self.assets.contains(asset_id)
    }

    /// Any-overlap match against the event's asset ids.
    pub fn matches_any_asset(&self, asset_ids: &[String]) -> bool {
        self.assets.is_empty() || asset_ids.iter().any(|id| self.assets.contains(id))
    }

    pub fn matches_market(&self, market: &str) -> bool {
        self.markets.is_empty() || self.markets.contains(market)
    }

    /// Enqueues without blocking. A full buffer drops the event and records
    /// one lag notification; a closed entry is a silent no-op.
    pub fn try_send(&self, event: E) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => self.notify_lag(1),
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Non-blocking lag report; dropped silently if the error queue is full.
    pub fn notify_lag(&self, count: u64) {
        if count == 0 {
            return;
        }
        let _ = self.err_tx.try_send(WsError::Lagged {
            count,
            topic: self.channel.as_str().to_string(),
            event_type: self.event_type.as_str().to_string(),
        });
    }

    /// Marks the entry closed. Returns `true` only on the first call; both
    /// queues shut down once the engine's index releases the entry.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}
