//! Periodic fan-out of walker samples.
//!
//! One [`StreamBroadcaster`] owns the walker and drives it from a single
//! timer task. Each tick's sample is queued for the sink writer and offered
//! to every registered [`Subscription`] without ever waiting on one.

use std::{
    collections::HashMap,
    fmt,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
    time::Duration,
};

use api_types::{GeoSample, TraceStats};
use futures_core::Stream;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot, watch,
    },
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    sink::{SampleSink, SinkError},
    walker::{DEFAULT_MAX_STEP_KM, PositionWalker, StepSource},
};

#[derive(Clone, Debug)]
pub struct BroadcastSettings {
    pub tick_interval: Duration,
    pub max_step_km: f64,
    /// Samples a subscriber may fall behind before it starts missing ticks.
    pub subscriber_buffer: usize,
    /// Samples waiting for the sink before new ones are dropped.
    pub sink_queue: usize,
    /// Upper bound on a single `store` call.
    pub sink_timeout: Duration,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            max_step_km: DEFAULT_MAX_STEP_KM,
            subscriber_buffer: 16,
            sink_queue: 64,
            sink_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    subscribers: HashMap<SubscriptionId, mpsc::Sender<GeoSample>>,
    closed: bool,
}

#[derive(Default)]
struct Registry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct Delivery {
    delivered: usize,
    dropped: u64,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, buffer: usize) -> (SubscriptionId, mpsc::Receiver<GeoSample>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let mut inner = self.lock();

        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;

        // After shutdown the sender is dropped right away and the stream ends.
        if !inner.closed {
            inner.subscribers.insert(id, tx);
        }

        (id, rx)
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        self.lock().subscribers.remove(&id).is_some()
    }

    fn len(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    fn deliver(&self, sample: GeoSample) -> Delivery {
        let targets: Vec<_> = self
            .lock()
            .subscribers
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivery = Delivery::default();
        let mut gone = Vec::new();

        for (id, tx) in targets {
            match tx.try_send(sample) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(%id, "subscriber is lagging, sample dropped");
                    delivery.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => gone.push(id),
            }
        }

        for id in gone {
            if self.remove(id) {
                info!(%id, "subscriber unreachable, removed");
            }
        }

        delivery
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

/// A live feed of samples, one per tick, starting with the next tick.
///
/// Dropping the subscription unregisters it.
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<GeoSample>,
    registry: Arc<Registry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next sample, or `None` once unsubscribed or the broadcaster stopped.
    pub async fn recv(&mut self) -> Option<GeoSample> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = GeoSample;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.registry.remove(self.id) {
            info!(id = %self.id, "subscriber disconnected");
        }
    }
}

/// Cloneable access to a running broadcaster's subscribers and totals.
#[derive(Clone)]
pub struct BroadcastHub {
    registry: Arc<Registry>,
    stats: watch::Receiver<TraceStats>,
    buffer: usize,
}

impl BroadcastHub {
    pub fn subscribe(&self) -> Subscription {
        let (id, receiver) = self.registry.insert(self.buffer);
        info!(%id, "subscriber connected");

        Subscription {
            id,
            receiver,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Stops deliveries to `id`. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.registry.remove(id);
        if removed {
            info!(%id, "subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> TraceStats {
        let mut stats = self.stats.borrow().clone();
        stats.subscribers = self.registry.len();
        stats
    }
}

// ============================================================================
// Broadcaster
// ============================================================================

/// Owns the tick loop and the sink writer.
///
/// Dropping it stops the timer; [`shutdown`](Self::shutdown) additionally
/// waits for queued samples to reach the sink.
pub struct StreamBroadcaster {
    hub: BroadcastHub,
    sink_timeout: Duration,
    shutdown_tx: Option<oneshot::Sender<()>>,
    ticker: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl StreamBroadcaster {
    /// Starts ticking. The first sample is produced one interval from now.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S>(
        walker: PositionWalker<S>,
        sink: Arc<dyn SampleSink>,
        settings: BroadcastSettings,
    ) -> Self
    where
        S: StepSource + 'static,
    {
        let registry = Arc::new(Registry::default());
        let (stats_tx, stats_rx) = watch::channel(TraceStats::default());
        let (sink_tx, sink_rx) = mpsc::channel(settings.sink_queue.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let period = settings.tick_interval.max(Duration::from_millis(1));
        let ticker = TickLoop {
            walker,
            max_step_km: settings.max_step_km,
            registry: Arc::clone(&registry),
            sink_tx,
            stats: stats_tx,
        };

        info!(
            period = ?period,
            max_step_km = settings.max_step_km,
            "starting trace broadcaster"
        );

        let ticker = tokio::spawn(ticker.run(period, shutdown_rx));
        let writer = tokio::spawn(write_samples(sink, sink_rx, settings.sink_timeout));

        Self {
            hub: BroadcastHub {
                registry,
                stats: stats_rx,
                buffer: settings.subscriber_buffer,
            },
            sink_timeout: settings.sink_timeout,
            shutdown_tx: Some(shutdown_tx),
            ticker: Some(ticker),
            writer: Some(writer),
        }
    }

    pub fn hub(&self) -> BroadcastHub {
        self.hub.clone()
    }

    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    pub fn stats(&self) -> TraceStats {
        self.hub.stats()
    }

    /// Stops the timer, ends every subscription and flushes the sink queue.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(ticker) = self.ticker.take() {
            if let Err(error) = ticker.await {
                warn!(%error, "tick loop ended abnormally");
            }
        }

        if let Some(mut writer) = self.writer.take() {
            if time::timeout(self.sink_timeout, &mut writer).await.is_err() {
                warn!("sink writer did not drain in time, abandoning queued samples");
                writer.abort();
            }
        }
    }
}

impl Drop for StreamBroadcaster {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

struct TickLoop<S> {
    walker: PositionWalker<S>,
    max_step_km: f64,
    registry: Arc<Registry>,
    sink_tx: mpsc::Sender<GeoSample>,
    stats: watch::Sender<TraceStats>,
}

impl<S: StepSource> TickLoop<S> {
    async fn run(mut self, period: Duration, mut shutdown: oneshot::Receiver<()>) {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,
                _ = interval.tick() => self.tick(),
            }
        }

        self.registry.close();

        let stats = self.stats.borrow();
        info!(
            ticks = stats.ticks,
            total_distance_km = stats.total_distance_km,
            "trace broadcaster stopped"
        );
    }

    fn tick(&mut self) {
        self.walker.advance(self.max_step_km);
        let sample = self.walker.sample();

        if let Err(error) = self.sink_tx.try_send(sample) {
            let error = match error {
                TrySendError::Full(_) => SinkError::Unavailable("write queue is full".into()),
                TrySendError::Closed(_) => SinkError::Closed,
            };
            warn!(%error, "sample not persisted");
        }

        let delivery = self.registry.deliver(sample);
        let subscribers = self.registry.len();

        self.stats.send_modify(|stats| {
            stats.ticks += 1;
            stats.total_distance_km += sample.distance;
            stats.dropped_deliveries += delivery.dropped;
            stats.subscribers = subscribers;
            stats.last_sample = Some(sample);
        });

        debug!(
            latitude = sample.coords.latitude,
            longitude = sample.coords.longitude,
            distance = sample.distance,
            delivered = delivery.delivered,
            "tick"
        );
    }
}

async fn write_samples(
    sink: Arc<dyn SampleSink>,
    mut queue: mpsc::Receiver<GeoSample>,
    timeout: Duration,
) {
    while let Some(sample) = queue.recv().await {
        let result = match time::timeout(timeout, sink.store(sample)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(timeout)),
        };

        if let Err(error) = result {
            warn!(%error, "failed to persist sample");
        }
    }

    debug!("sink writer finished");
}
