//! EventBus implementation
//!
//! Two delivery paths share one bus:
//! - Topic subscriptions: each subscriber owns a bounded queue drained by its
//!   own tokio task, so a slow or failing handler never blocks the publisher.
//!   Handlers run on the blocking thread pool one event at a time, so a
//!   handler that blocks does not hold a runtime worker.
//!   A full queue drops the event for that subscriber only and logs it.
//! - A broadcast stream of every event for consumers that want to `.recv()`
//!   themselves (lagging receivers lose the oldest events).

use super::{SwivelEvent, Topic};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

/// Error returned by a subscriber's handler
///
/// Logged by the bus; never reaches the publisher or other subscribers.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError(message.to_string())
    }
}

pub type HandlerResult = std::result::Result<(), HandlerError>;

/// A topic subscriber
///
/// Implemented for any `Fn(&SwivelEvent) -> HandlerResult` closure. Called
/// from a blocking-pool thread, never from inside the async runtime.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: &SwivelEvent) -> HandlerResult;
}

impl<F> EventHandler for F
where
    F: Fn(&SwivelEvent) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, event: &SwivelEvent) -> HandlerResult {
        self(event)
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    topic: Topic,
    tx: mpsc::Sender<SwivelEvent>,
}

struct BusInner {
    stream_tx: broadcast::Sender<SwivelEvent>,
    capacity: usize,
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

/// Central event distribution bus
///
/// Cloning is cheap; all clones share subscribers.
///
/// # Examples
///
/// ```
/// use swivel_common::events::{EventBus, SwivelEvent, Topic};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = EventBus::new(64);
///
/// let id = bus.subscribe(Topic::PlaceCreated, |event: &SwivelEvent| {
///     println!("new place: {:?}", event);
///     Ok(())
/// });
///
/// bus.publish(SwivelEvent::PlaceCreated {
///     place_id: 1,
///     latitude: 10.0,
///     longitude: 10.0,
///     radius_meters: 50.0,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(bus.unsubscribe(id));
/// # }
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a new EventBus
    ///
    /// # Arguments
    ///
    /// * `capacity` - Per-subscriber queue length, also used for the
    ///   broadcast stream buffer. Clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (stream_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(BusInner {
                stream_tx,
                capacity,
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a handler for one topic
    ///
    /// Spawns the subscriber's delivery task, so this must be called from
    /// within a tokio runtime. Handler errors and panics are logged and the
    /// subscriber keeps receiving.
    pub fn subscribe<H: EventHandler>(&self, topic: Topic, handler: H) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, mut rx) = mpsc::channel::<SwivelEvent>(self.inner.capacity);

        let handler = Arc::new(handler);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let handler = handler.clone();
                match tokio::task::spawn_blocking(move || handler.handle(&event)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(subscription = id.0, topic = %topic, "Event handler failed: {}", e);
                    }
                    Err(e) if e.is_panic() => {
                        error!(subscription = id.0, topic = %topic, "Event handler panicked");
                    }
                    Err(e) => {
                        debug!(subscription = id.0, topic = %topic, "Event handler cancelled: {}", e);
                        break;
                    }
                }
            }
            debug!(subscription = id.0, topic = %topic, "Subscriber task finished");
        });

        self.write_subscribers().push(Subscriber { id, topic, tx });
        debug!(subscription = id.0, topic = %topic, "Subscribed");
        id
    }

    /// Remove a subscription
    ///
    /// Events already queued for it are still delivered. Returns false if the
    /// handle was unknown (or already removed).
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.write_subscribers();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }

    /// Subscribe to the raw stream of all future events
    pub fn stream(&self) -> broadcast::Receiver<SwivelEvent> {
        self.inner.stream_tx.subscribe()
    }

    /// Publish an event to every subscriber of its topic
    ///
    /// Never blocks. Returns the number of topic subscribers the event was
    /// queued for; full queues drop the event for that subscriber.
    pub fn publish(&self, event: SwivelEvent) -> usize {
        let topic = event.topic();
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let subscribers = self
                .inner
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);

            for subscriber in subscribers.iter().filter(|s| s.topic == topic) {
                match subscriber.tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            subscription = subscriber.id.0,
                            topic = %topic,
                            "Subscriber queue full, dropping event"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(subscriber.id),
                }
            }
        }

        if !closed.is_empty() {
            self.write_subscribers().retain(|s| !closed.contains(&s.id));
        }

        // No stream receivers is fine
        let _ = self.inner.stream_tx.send(event);

        delivered
    }

    /// Number of topic subscriptions (all topics)
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of topic subscriptions for one topic
    pub fn topic_subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.topic == topic)
            .count()
    }

    /// Events dropped on full subscriber queues since creation
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Get the configured per-subscriber queue capacity
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    fn write_subscribers(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Subscriber>> {
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
