use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub events_in: u64,
    pub events_duplicate: u64,
    pub events_failed: u64,
    pub intents_created: u64,
    pub intents_confirmed: u64,
    pub intents_rejected: u64,
    pub messages_out: u64,
}

#[derive(Debug)]
pub struct MetricsStore {
    start_time: Instant,
    events_in: AtomicU64,
    events_duplicate: AtomicU64,
    events_failed: AtomicU64,
    intents_created: AtomicU64,
    intents_confirmed: AtomicU64,
    intents_rejected: AtomicU64,
    messages_out: AtomicU64,
}

impl MetricsStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            events_in: AtomicU64::new(0),
            events_duplicate: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            intents_created: AtomicU64::new(0),
            intents_confirmed: AtomicU64::new(0),
            intents_rejected: AtomicU64::new(0),
            messages_out: AtomicU64::new(0),
        })
    }

    pub fn inc_events_in(&self) {
        self.events_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_duplicate(&self) {
        self.events_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_intents_created(&self) {
        self.intents_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_intents_confirmed(&self) {
        self.intents_confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_intents_rejected(&self) {
        self.intents_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_messages_out(&self) {
        self.messages_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            events_in: self.events_in.load(Ordering::Relaxed),
            events_duplicate: self.events_duplicate.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            intents_created: self.intents_created.load(Ordering::Relaxed),
            intents_confirmed: self.intents_confirmed.load(Ordering::Relaxed),
            intents_rejected: self.intents_rejected.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
        }
    }
}
