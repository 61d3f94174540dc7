//! Pheromone-weighted event bus.
//!
//! Producers `emit` JSON payloads with a priority in [0, 1]. Each emission
//! decays and then reinforces the trail of the payload's category, and the
//! event is queued by priority (FIFO among equal priorities). A single
//! consumer loop (`process_events`) pops the highest-priority event and
//! awaits each matching handler in registration order.
//!
//! - `"*"` subscriptions match every category.
//! - Payloads without a `category` string are filed under `"unknown"`.
//! - Handler errors and panics are logged and never stop the loop.

use crate::config::BusConfig;
use crate::journal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mycelia_core::{hours_between, Trail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Subscription pattern matching every category.
pub const WILDCARD: &str = "*";

/// Category assigned to payloads that do not name one.
pub const UNKNOWN_CATEGORY: &str = "unknown";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub payload: Map<String, Value>,
    pub category: String,
    pub priority: f64,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Convenience accessor for string fields of the payload.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// A subscriber. Implementations may do synchronous work or await; the bus
/// always waits for `handle` to finish before invoking the next handler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// Adapter turning a synchronous closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        (self.f)(event)
    }
}

struct Subscription {
    pattern: String,
    handler: Arc<dyn EventHandler>,
}

impl Subscription {
    fn matches(&self, category: &str) -> bool {
        self.pattern == WILDCARD || self.pattern == category
    }
}

struct Queued {
    priority: f64,
    seq: u64,
    event: Event,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier insertion.
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// On-disk form of the trail map.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrailSnapshot {
    pub saved_at: DateTime<Utc>,
    pub trails: Vec<Trail>,
}

pub struct EventBus {
    config: BusConfig,
    subscribers: RwLock<Vec<Subscription>>,
    queue: Mutex<BinaryHeap<Queued>>,
    seq: AtomicU64,
    notify: Notify,
    trails: Mutex<HashMap<String, Trail>>,
    emissions: AtomicU64,
    stopped: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EventBus {
    /// Build a bus, restoring trails from the configured snapshot if one exists.
    pub fn new(config: BusConfig) -> Self {
        let mut trails = HashMap::new();
        if let Some(path) = &config.snapshot_path {
            match journal::read_snapshot::<TrailSnapshot>(path) {
                Ok(Some(snap)) => {
                    info!(path = %path.display(), trails = snap.trails.len(), "Restored trail snapshot");
                    trails.extend(snap.trails.into_iter().map(|t| (t.category.clone(), t)));
                }
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable trail snapshot"),
            }
        }
        Self {
            config,
            subscribers: RwLock::new(Vec::new()),
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            notify: Notify::new(),
            trails: Mutex::new(trails),
            emissions: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn subscribe(&self, pattern: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let pattern = pattern.into();
        debug!(pattern = %pattern, handler = handler.name(), "Subscribed");
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription { pattern, handler });
    }

    pub fn subscribe_fn<F>(&self, pattern: impl Into<String>, name: impl Into<String>, f: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(pattern, Arc::new(FnHandler::new(name, f)));
    }

    /// Number of handlers an event of `category` would currently reach.
    pub fn subscriber_count(&self, category: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.matches(category))
            .count()
    }

    pub fn emit(&self, payload: Value, priority: f64) -> usize {
        self.emit_at(payload, priority, Utc::now())
    }

    /// Queue an event, updating its category's trail as of `now`.
    /// Returns the number of handlers that will receive it.
    pub fn emit_at(&self, payload: Value, priority: f64, now: DateTime<Utc>) -> usize {
        let payload = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let category = payload
            .get("category")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .unwrap_or(UNKNOWN_CATEGORY)
            .to_string();
        let priority = if priority.is_finite() {
            priority.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let age_hours = payload
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|created| hours_between(created.with_timezone(&Utc), now))
            .unwrap_or(0.0);
        let urgency = self.config.temporal.scale(priority, age_hours);

        {
            let mut trails = lock(&self.trails);
            trails
                .entry(category.clone())
                .or_insert_with(|| Trail::new(category.clone(), now))
                .reinforce(
                    urgency,
                    now,
                    self.config.decay_rate,
                    self.config.max_strength,
                );
        }

        let emitted = self.emissions.fetch_add(1, AtomicOrdering::Relaxed) + 1;
        if self.config.snapshot_every > 0 && emitted % self.config.snapshot_every == 0 {
            self.persist_trails();
        }

        let notified = self.subscriber_count(&category);
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(category = %category, priority, notified, "Event emitted");
        lock(&self.queue).push(Queued {
            priority,
            seq,
            event: Event {
                payload,
                category,
                priority,
                timestamp: now,
            },
        });
        self.notify.notify_one();
        notified
    }

    /// Events waiting for dispatch.
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    fn pop(&self) -> Option<Event> {
        lock(&self.queue).pop().map(|q| q.event)
    }

    /// Deliver one event to every matching handler, in registration order.
    /// Returns the number of handlers that completed successfully.
    pub async fn dispatch(&self, event: Event) -> usize {
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.matches(&event.category))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        let event = Arc::new(event);
        let mut delivered = 0;
        for handler in handlers {
            let name = handler.name().to_string();
            let ev = Arc::clone(&event);
            // Run on its own task so a panicking handler is contained.
            let outcome = tokio::spawn(async move { handler.handle(&ev).await }).await;
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(
                    handler = %name,
                    category = %event.category,
                    error = %e,
                    "Handler failed"
                ),
                Err(e) => warn!(
                    handler = %name,
                    category = %event.category,
                    error = %e,
                    "Handler panicked"
                ),
            }
        }
        delivered
    }

    /// Dispatch everything currently queued. Returns the number of events dispatched.
    pub async fn drain(&self) -> usize {
        let mut n = 0;
        while let Some(event) = self.pop() {
            self.dispatch(event).await;
            n += 1;
        }
        n
    }

    /// Consumer loop. Runs until [`stop`](Self::stop) is called; the event
    /// being dispatched when `stop` arrives is finished first.
    pub async fn process_events(&self) {
        info!("Event loop started");
        let poll = self.config.poll_interval();
        while !self.stopped.load(AtomicOrdering::Acquire) {
            match self.pop() {
                Some(event) => {
                    self.dispatch(event).await;
                }
                None => {
                    let _ = tokio::time::timeout(poll, self.notify.notified()).await;
                }
            }
        }
        info!(pending = self.pending(), "Event loop stopped");
    }

    /// Signal the loop to exit and persist trails.
    pub fn stop(&self) {
        self.stopped.store(true, AtomicOrdering::Release);
        self.notify.notify_waiters();
        self.persist_trails();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(AtomicOrdering::Acquire)
    }

    pub fn get_pheromone_strength(&self, category: &str) -> f64 {
        self.get_pheromone_strength_at(category, Utc::now())
    }

    /// Strength of `category` after applying decay up to `now`. Unknown
    /// categories have strength 0.
    pub fn get_pheromone_strength_at(&self, category: &str, now: DateTime<Utc>) -> f64 {
        let mut trails = lock(&self.trails);
        match trails.get_mut(category) {
            Some(trail) => {
                trail.decay_to(now, self.config.decay_rate);
                trail.strength
            }
            None => 0.0,
        }
    }

    pub fn get_strongest_trails(&self, k: usize) -> Vec<(String, f64)> {
        self.get_strongest_trails_at(k, Utc::now())
    }

    /// Top `k` categories by decayed strength, strongest first.
    pub fn get_strongest_trails_at(&self, k: usize, now: DateTime<Utc>) -> Vec<(String, f64)> {
        let mut trails = lock(&self.trails);
        let mut ranked: Vec<(String, f64)> = trails
            .values_mut()
            .map(|t| {
                t.decay_to(now, self.config.decay_rate);
                (t.category.clone(), t.strength)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }

    /// Copy of every trail, sorted by category.
    pub fn trails(&self) -> Vec<Trail> {
        let mut trails: Vec<Trail> = lock(&self.trails).values().cloned().collect();
        trails.sort_by(|a, b| a.category.cmp(&b.category));
        trails
    }

    /// Write the trail snapshot now. Returns false (after logging) on failure.
    pub fn persist_trails(&self) -> bool {
        let Some(path) = &self.config.snapshot_path else {
            return true;
        };
        let snapshot = TrailSnapshot {
            saved_at: Utc::now(),
            trails: self.trails(),
        };
        match journal::write_snapshot(path, &snapshot) {
            Ok(()) => {
                debug!(path = %path.display(), trails = snapshot.trails.len(), "Trail snapshot written");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Trail snapshot failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn recorder(bus: &EventBus, pattern: &str) -> Arc<StdMutex<Vec<Event>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe_fn(pattern, format!("recorder:{pattern}"), move |e| {
            sink.lock().unwrap().push(e.clone());
            Ok(())
        });
        seen
    }

    #[tokio::test]
    async fn test_higher_priority_dispatches_first() {
        let bus = EventBus::new(BusConfig::default());
        let seen = recorder(&bus, WILDCARD);

        bus.emit(json!({"category": "a", "n": 1}), 0.1);
        bus.emit(json!({"category": "a", "n": 2}), 0.9);
        bus.emit(json!({"category": "b", "n": 3}), 0.5);
        assert_eq!(bus.drain().await, 3);

        let order: Vec<i64> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.payload["n"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn test_equal_priority_is_fifo() {
        let bus = EventBus::new(BusConfig::default());
        let seen = recorder(&bus, "t");
        for n in 0..10 {
            bus.emit(json!({"category": "t", "n": n}), 0.5);
        }
        bus.drain().await;
        let order: Vec<i64> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.payload["n"].as_i64().unwrap())
            .collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_emit_counts_category_and_wildcard_handlers() {
        let bus = EventBus::new(BusConfig::default());
        let _a = recorder(&bus, "a");
        let _a2 = recorder(&bus, "a");
        let _all = recorder(&bus, WILDCARD);
        let _b = recorder(&bus, "b");
        assert_eq!(bus.emit(json!({"category": "a"}), 0.5), 3);
        assert_eq!(bus.emit(json!({"category": "c"}), 0.5), 1);
    }

    #[tokio::test]
    async fn test_missing_category_is_unknown() {
        let bus = EventBus::new(BusConfig::default());
        let seen = recorder(&bus, UNKNOWN_CATEGORY);
        bus.emit(json!({"msg": "no category"}), 0.4);
        bus.emit(json!(42), 0.4);
        bus.drain().await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].payload["value"], json!(42));
        assert!(bus.get_pheromone_strength(UNKNOWN_CATEGORY) > 0.0);
    }

    #[tokio::test]
    async fn test_failing_handlers_do_not_block_others() {
        let bus = EventBus::new(BusConfig::default());
        bus.subscribe_fn("x", "fails", |_| anyhow::bail!("boom"));
        bus.subscribe_fn("x", "panics", |_| panic!("handler bug"));
        let seen = recorder(&bus, "x");

        bus.emit(json!({"category": "x"}), 1.0);
        bus.emit(json!({"category": "x"}), 0.2);
        assert_eq!(bus.drain().await, 2);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let bus = EventBus::new(BusConfig::default());
        let log = Arc::new(StdMutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            let pattern = if name == "second" { WILDCARD } else { "k" };
            bus.subscribe_fn(pattern, name, move |_| {
                log.lock().unwrap().push(name);
                Ok(())
            });
        }
        bus.emit(json!({"category": "k"}), 0.5);
        bus.drain().await;
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_strength_decays_between_emissions() {
        let bus = EventBus::new(BusConfig::default());
        let t0 = Utc::now();
        bus.emit_at(json!({"category": "c"}), 1.0, t0);
        let s0 = bus.get_pheromone_strength_at("c", t0);
        let s1 = bus.get_pheromone_strength_at("c", t0 + Duration::hours(5));
        let s2 = bus.get_pheromone_strength_at("c", t0 + Duration::hours(50));
        assert_eq!(s0, 1.0);
        assert!(s1 < s0 && s2 < s1);
        assert_eq!(bus.get_pheromone_strength("never-seen"), 0.0);
    }

    #[test]
    fn test_strongest_trails_ranked() {
        let bus = EventBus::new(BusConfig::default());
        let now = Utc::now();
        for _ in 0..3 {
            bus.emit_at(json!({"category": "hot"}), 1.0, now);
        }
        bus.emit_at(json!({"category": "warm"}), 1.0, now);
        bus.emit_at(json!({"category": "cold"}), 0.1, now);
        let top = bus.get_strongest_trails_at(2, now);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, "hot");
        assert_eq!(top[1].0, "warm");
    }

    #[test]
    fn test_stale_events_reinforce_less_with_temporal_weighting() {
        let mut config = BusConfig::default();
        config.temporal.enabled = true;
        let bus = EventBus::new(config);
        let now = Utc::now();
        let old = (now - Duration::hours(72)).to_rfc3339();
        bus.emit_at(json!({"category": "fresh"}), 0.5, now);
        bus.emit_at(json!({"category": "stale", "created_at": old}), 0.5, now);
        assert!(
            bus.get_pheromone_strength_at("stale", now)
                < bus.get_pheromone_strength_at("fresh", now)
        );
    }

    #[tokio::test]
    async fn test_stop_ends_loop_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trails.json");
        let config = BusConfig {
            snapshot_path: Some(path.clone()),
            poll_interval_ms: 20,
            ..Default::default()
        };
        let bus = Arc::new(EventBus::new(config.clone()));
        let seen = recorder(&bus, WILDCARD);

        let runner = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.process_events().await })
        };
        bus.emit(json!({"category": "persist"}), 0.8);
        for _ in 0..100 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        bus.stop();
        runner.await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);

        let restored = EventBus::new(config);
        assert!(restored.get_pheromone_strength("persist") > 0.0);
        assert_eq!(restored.trails()[0].emission_count, 1);
    }

    #[test]
    fn test_snapshot_written_every_n_emissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trails.json");
        let bus = EventBus::new(BusConfig {
            snapshot_path: Some(path.clone()),
            snapshot_every: 3,
            ..Default::default()
        });

        bus.emit(json!({"category": "a"}), 0.5);
        bus.emit(json!({"category": "b"}), 0.5);
        assert!(!path.exists());

        bus.emit(json!({"category": "a"}), 0.5);
        let snap: TrailSnapshot = journal::read_snapshot(&path).unwrap().unwrap();
        assert_eq!(snap.trails.len(), 2);
        let a = snap.trails.iter().find(|t| t.category == "a").unwrap();
        assert_eq!(a.emission_count, 2);
    }

    #[test]
    fn test_snapshot_failure_does_not_block_emission() {
        let dir = tempfile::tempdir().unwrap();
        // A directory at the snapshot path makes the final rename fail.
        let path = dir.path().join("trails.json");
        std::fs::create_dir(&path).unwrap();
        let bus = EventBus::new(BusConfig {
            snapshot_path: Some(path.clone()),
            snapshot_every: 1,
            ..Default::default()
        });

        let _all = recorder(&bus, WILDCARD);
        assert_eq!(bus.emit(json!({"category": "a"}), 0.5), 1);
        assert_eq!(bus.pending(), 1);
        assert!(bus.get_pheromone_strength("a") > 0.0);
        assert!(!bus.persist_trails());
        assert!(path.is_dir());
    }
}
