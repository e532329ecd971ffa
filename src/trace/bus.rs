use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::{sync::oneshot, task};
use uuid::Uuid;

use super::event::{TraceEvent, TraceRecord};
use super::sink::TraceSink;
use super::stream::TraceStream;

/// Broadcast buffer size used when the caller does not pick one.
pub const DEFAULT_TRACE_CAPACITY: usize = 1024;

/// Per-run trace hub: appends every event to an in-memory history, fans it
/// out to live broadcast subscribers, and forwards it to registered sinks
/// through a background worker.
///
/// The three paths have different guarantees. History is append-only and
/// lossless. Broadcast subscribers are bounded by `capacity` and may lag
/// (losses are tallied on [`dropped`](Self::dropped)). Sinks see records in
/// order once [`start_sink_worker`](Self::start_sink_worker) has run, and
/// [`stop_sink_worker`](Self::stop_sink_worker) drains anything still queued
/// before returning.
pub struct TraceBus {
    run_id: Uuid,
    capacity: usize,
    history: Arc<Mutex<Vec<TraceRecord>>>,
    broadcast: broadcast::Sender<TraceRecord>,
    dropped_records: Arc<AtomicUsize>,
    sink_channel: (flume::Sender<TraceRecord>, flume::Receiver<TraceRecord>),
    sinks: Arc<Mutex<Vec<Box<dyn TraceSink>>>>,
    sink_active: Arc<AtomicBool>,
    worker: Mutex<Option<WorkerState>>,
}

impl Default for TraceBus {
    fn default() -> Self {
        Self::new(Uuid::new_v4(), DEFAULT_TRACE_CAPACITY)
    }
}

impl TraceBus {
    pub fn new(run_id: Uuid, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (broadcast, _) = broadcast::channel(capacity);
        Self {
            run_id,
            capacity,
            history: Arc::new(Mutex::new(Vec::new())),
            broadcast,
            dropped_records: Arc::new(AtomicUsize::new(0)),
            sink_channel: flume::unbounded(),
            sinks: Arc::new(Mutex::new(Vec::new())),
            sink_active: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Dynamically add a sink (useful for per-request streaming).
    pub fn add_sink<T: TraceSink + 'static>(&self, sink: T) {
        self.sinks.lock().unwrap().push(Box::new(sink));
    }

    /// Stamp and publish one event.
    ///
    /// Appends to history unconditionally, then offers the record to live
    /// subscribers and, when the sink worker is running, to the sink queue.
    pub fn emit(&self, event: TraceEvent) -> TraceRecord {
        let record = TraceRecord::new(self.run_id, event);
        self.history.lock().unwrap().push(record.clone());
        let _ = self.broadcast.send(record.clone());
        if self.sink_active.load(Ordering::Acquire) {
            let _ = self.sink_channel.0.send(record.clone());
        }
        record
    }

    /// Subscribe to records emitted from this point on.
    ///
    /// Catching up on earlier records goes through [`history`](Self::history).
    pub fn subscribe(&self) -> TraceStream {
        TraceStream::new(self.broadcast.subscribe(), Arc::clone(&self.dropped_records))
    }

    /// Snapshot of every record emitted so far, in emission order.
    pub fn history(&self) -> Vec<TraceRecord> {
        self.history.lock().unwrap().clone()
    }

    /// Shared handle to the history buffer, for retention past the bus's
    /// lifetime.
    pub fn history_handle(&self) -> Arc<Mutex<Vec<TraceRecord>>> {
        Arc::clone(&self.history)
    }

    /// Total records lost by lagging broadcast subscribers.
    pub fn dropped(&self) -> usize {
        self.dropped_records.load(Ordering::Relaxed)
    }

    /// Spawn a background task that forwards records to all sinks.
    /// Idempotent: calling multiple times has no effect.
    pub fn start_sink_worker(&self) {
        let mut guard = self.worker.lock().expect("worker poisoned");
        if guard.is_some() {
            return; // Already running
        }

        self.sink_active.store(true, Ordering::Release);
        let receiver = self.sink_channel.1.clone();
        let sinks = self.sinks.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = task::spawn(async move {
            let deliver = |record: &TraceRecord| {
                let mut sinks_guard = sinks.lock().unwrap();
                for sink in sinks_guard.iter_mut() {
                    if let Err(e) = sink.deliver(record) {
                        eprintln!("TraceBus sink error: {e}");
                    }
                }
            };
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    recv = receiver.recv_async() => match recv {
                        Err(e) => {
                            eprintln!("TraceBus receiver error: {e}");
                            break;
                        }
                        Ok(record) => deliver(&record),
                    }
                }
            }
            // Flush whatever arrived before the shutdown signal.
            while let Ok(record) = receiver.try_recv() {
                deliver(&record);
            }
        });

        *guard = Some(WorkerState {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the background worker, draining queued records into the sinks
    /// first.
    pub async fn stop_sink_worker(&self) {
        let state = {
            let mut guard = self.worker.lock().expect("worker poisoned");
            self.sink_active.store(false, Ordering::Release);
            guard.take()
        };
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            let _ = state.handle.await;
        }
    }
}

impl Drop for TraceBus {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.worker.lock() {
            if let Some(state) = guard.take() {
                let _ = state.shutdown_tx.send(());
                state.handle.abort();
            }
        }
    }
}

struct WorkerState {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::sink::MemorySink;
    use std::time::Duration;

    #[tokio::test]
    async fn history_keeps_every_record_in_order() {
        let bus = TraceBus::new(Uuid::new_v4(), 4);
        bus.emit(TraceEvent::execution_started("wf", "goal"));
        bus.emit(TraceEvent::block_completed("goal", 1, 1.0, false));
        bus.emit(TraceEvent::execution_completed("done"));

        let history = bus.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].event.kind(), "execution_started");
        assert_eq!(history[2].event.kind(), "execution_completed");
        assert!(history.iter().all(|r| r.run_id == bus.run_id()));
    }

    #[tokio::test]
    async fn subscribers_see_records_live() {
        let bus = TraceBus::new(Uuid::new_v4(), 8);
        let mut stream = bus.subscribe();
        bus.emit(TraceEvent::block_started(
            "draft",
            crate::types::BlockType::Reasoning,
            1,
        ));

        let record = stream
            .next_timeout(Duration::from_millis(200))
            .await
            .expect("record should arrive");
        assert_eq!(record.event.block_id(), Some("draft"));
    }

    #[tokio::test]
    async fn lagging_subscriber_is_counted_not_blocked() {
        let bus = TraceBus::new(Uuid::new_v4(), 2);
        let mut stream = bus.subscribe();
        for step in 0..6 {
            bus.emit(TraceEvent::block_completed("b", step, 0.9, false));
        }

        let mut seen = 0;
        while stream.next_timeout(Duration::from_millis(50)).await.is_some() {
            seen += 1;
        }
        assert!(seen <= 2, "bounded channel should cap live delivery");
        assert!(bus.dropped() >= 4);
        assert_eq!(bus.history().len(), 6, "history never drops");
    }

    #[tokio::test]
    async fn sink_worker_drains_on_stop() {
        let bus = TraceBus::new(Uuid::new_v4(), 8);
        let sink = MemorySink::new();
        bus.add_sink(sink.clone());
        bus.start_sink_worker();

        for step in 0..5 {
            bus.emit(TraceEvent::block_completed("b", step, 0.9, false));
        }
        bus.stop_sink_worker().await;

        assert_eq!(sink.snapshot().len(), 5);
    }

    #[tokio::test]
    async fn starting_the_worker_twice_is_a_no_op() {
        let bus = TraceBus::default();
        let sink = MemorySink::new();
        bus.add_sink(sink.clone());
        bus.start_sink_worker();
        bus.start_sink_worker();

        bus.emit(TraceEvent::execution_completed("done"));
        bus.stop_sink_worker().await;

        assert_eq!(sink.snapshot().len(), 1, "no duplicate delivery");
    }
}
