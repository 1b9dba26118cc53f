//! Inbound message queue and rate-limited pump.
//!
//! The socket reader pushes parsed frames into an unbounded FIFO. One pump
//! task per call drains it: it sleeps until something is enqueued, then
//! handles at most `batch_size` items per `interval` tick, one at a time and
//! in arrival order.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Default pump tick.
pub const DEFAULT_PUMP_INTERVAL: Duration = Duration::from_millis(25);

/// Default items handled per tick.
pub const DEFAULT_PUMP_BATCH_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpSettings {
    pub interval: Duration,
    pub batch_size: usize,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PUMP_INTERVAL,
            batch_size: DEFAULT_PUMP_BATCH_SIZE,
        }
    }
}

/// Producer side of the per-call FIFO.
#[derive(Debug)]
pub struct InboundMessageQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> Clone for InboundMessageQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            depth: self.depth.clone(),
        }
    }
}

/// Consumer side, owned by the pump.
#[derive(Debug)]
pub struct InboundMessageReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> InboundMessageQueue<T> {
    pub fn new() -> (Self, InboundMessageReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        (
            Self {
                tx,
                depth: depth.clone(),
            },
            InboundMessageReceiver { rx, depth },
        )
    }

    /// Enqueue an item. Returns `false` once the pump has gone away.
    pub fn push(&self, item: T) -> bool {
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(item).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Items waiting for the pump.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> InboundMessageReceiver<T> {
    async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await;
        if item.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    fn try_recv(&mut self) -> Option<T> {
        let item = self.rx.try_recv().ok();
        if item.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }
}

/// Drains an [`InboundMessageReceiver`] at a bounded rate.
#[derive(Debug, Clone)]
pub struct MessagePump {
    settings: PumpSettings,
}

impl MessagePump {
    pub fn new(settings: PumpSettings) -> Self {
        Self { settings }
    }

    /// Run until every producer is dropped and the queue is empty.
    pub async fn run<T, F>(&self, mut rx: InboundMessageReceiver<T>, mut handle: F)
    where
        F: FnMut(T),
    {
        let batch_size = self.settings.batch_size.max(1);
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Idle until something arrives, then wait for the tick
        while let Some(first) = rx.recv().await {
            ticker.tick().await;

            handle(first);
            let mut processed = 1;
            while processed < batch_size {
                let Some(item) = rx.try_recv() else { break };
                handle(item);
                processed += 1;
            }
            tracing::trace!("Pump handled {} item(s)", processed);
        }
        tracing::debug!("Inbound queue closed, pump exiting");
    }
}
