use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream;
use tokio::sync::broadcast::{self, Receiver};
use tokio::time::timeout;

use super::event::TraceRecord;

/// Live subscription to a run's trace.
///
/// Backed by a bounded broadcast channel: a subscriber that falls more than
/// the bus capacity behind loses the oldest records, and every loss is
/// tallied on the owning bus's dropped counter. History replay via
/// [`TraceBus::history`](super::TraceBus::history) is the lossless path.
#[derive(Debug)]
pub struct TraceStream {
    receiver: Receiver<TraceRecord>,
    dropped: Arc<AtomicUsize>,
}

impl TraceStream {
    pub(super) fn new(receiver: Receiver<TraceRecord>, dropped: Arc<AtomicUsize>) -> Self {
        Self { receiver, dropped }
    }

    pub async fn recv(&mut self) -> Result<TraceRecord, broadcast::error::RecvError> {
        match self.receiver.recv().await {
            Ok(record) => Ok(record),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                self.dropped.fetch_add(missed as usize, Ordering::Relaxed);
                Err(broadcast::error::RecvError::Lagged(missed))
            }
            Err(err) => Err(err),
        }
    }

    pub fn try_recv(&mut self) -> Result<TraceRecord, broadcast::error::TryRecvError> {
        match self.receiver.try_recv() {
            Ok(record) => Ok(record),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                self.dropped.fetch_add(missed as usize, Ordering::Relaxed);
                Err(broadcast::error::TryRecvError::Lagged(missed))
            }
            Err(err) => Err(err),
        }
    }

    pub fn into_inner(self) -> Receiver<TraceRecord> {
        self.receiver
    }

    /// Adapts this subscription into a `futures` stream, silently skipping
    /// over lagged gaps and ending when the bus is dropped.
    pub fn into_async_stream(self) -> impl futures_util::stream::Stream<Item = TraceRecord> {
        stream::unfold(self, |mut stream| async move {
            loop {
                match stream.recv().await {
                    Ok(record) => return Some((record, stream)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    /// Waits up to `duration` for the next record, skipping lagged gaps.
    pub async fn next_timeout(&mut self, duration: Duration) -> Option<TraceRecord> {
        loop {
            match timeout(duration, self.recv()).await {
                Ok(Ok(record)) => return Some(record),
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                Err(_) => return None,
            }
        }
    }
}
