//! Feed subscriber entries and typed stream mapping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::WsError;
use crate::feed::types::FeedMessage;
use crate::stream::{EventStream, ERR_BUFFER, STREAM_BUFFER};

pub(crate) type MessageFilter = Box<dyn Fn(&FeedMessage) -> bool + Send + Sync>;

/// One raw-stream subscriber keyed by `topic|type`.
pub(crate) struct FeedEntry {
    pub id: String,
    pub key: String,
    pub topic: String,
    pub msg_type: String,
    filter: Option<MessageFilter>,
    tx: mpsc::Sender<FeedMessage>,
    err_tx: mpsc::Sender<WsError>,
    closed: AtomicBool,
}

impl FeedEntry {
    pub fn new(
        id: String,
        key: String,
        topic: String,
        msg_type: String,
        filter: Option<MessageFilter>,
    ) -> (
        Arc<Self>,
        mpsc::Receiver<FeedMessage>,
        mpsc::Receiver<WsError>,
    ) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (err_tx, err_rx) = mpsc::channel(ERR_BUFFER);
        let entry = Arc::new(Self {
            id,
            key,
            topic,
            msg_type,
            filter,
            tx,
            err_tx,
            closed: AtomicBool::new(false),
        });
        (entry, rx, err_rx)
    }

    /// Topic must match; `*` matches any message type; the optional
    /// predicate narrows further.
    pub fn matches(&self, msg: &FeedMessage) -> bool {
        if msg.topic != self.topic {
            return false;
        }
        if self.msg_type != "*" && msg.msg_type != self.msg_type {
            return false;
        }
        match &self.filter {
            Some(filter) => filter(msg),
            None => true,
        }
    }

    pub fn try_send(&self, msg: FeedMessage) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => self.notify_lag(1),
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub fn notify_lag(&self, count: u64) {
        if count == 0 {
            return;
        }
        let _ = self.err_tx.try_send(WsError::Lagged {
            count,
            topic: self.topic.clone(),
            event_type: self.msg_type.clone(),
        });
    }

    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

/// Wraps a raw message stream into a typed one. The mapper task forwards
/// mapped payloads with the same non-blocking lag semantics and passes
/// source errors through; closing the typed stream closes the raw one.
pub(crate) fn map_stream<T: Send + 'static>(
    source: EventStream<FeedMessage>,
    topic: String,
    msg_type: String,
    map_fn: impl Fn(FeedMessage) -> Option<T> + Send + 'static,
) -> EventStream<T> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let (err_tx, err_rx) = mpsc::channel(ERR_BUFFER);
    let (mut src_events, mut src_errors, closer) = source.into_parts();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = src_events.recv() => {
                    let Some(msg) = msg else { return };
                    let Some(mapped) = map_fn(msg) else { continue };
                    match tx.try_send(mapped) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            let _ = err_tx.try_send(WsError::Lagged {
                                count: 1,
                                topic: topic.clone(),
                                event_type: msg_type.clone(),
                            });
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => return,
                    }
                }
                err = src_errors.recv() => {
                    let Some(err) = err else { return };
                    let _ = err_tx.try_send(err);
                }
            }
        }
    });

    EventStream::from_parts(rx, err_rx, closer)
}
