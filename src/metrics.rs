//! Counters for sessions, routing and producer retries

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared counters. Cloning shares the underlying atomics.
#[derive(Debug, Clone, Default)]
pub struct BrokerMetrics {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    records_received: AtomicU64,
    records_dispatched: AtomicU64,
    records_skipped: AtomicU64,
    records_unrouted: AtomicU64,
    decode_failures: AtomicU64,
    handler_failures: AtomicU64,
    connect_attempts: AtomicU64,
    reconnects: AtomicU64,
    sends_ok: AtomicU64,
    send_retries: AtomicU64,
    sends_failed: AtomicU64,
    live_sessions: AtomicUsize,
}

/// Point-in-time copy of [`BrokerMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_received: u64,
    pub records_dispatched: u64,
    pub records_skipped: u64,
    pub records_unrouted: u64,
    pub decode_failures: u64,
    pub handler_failures: u64,
    pub connect_attempts: u64,
    pub reconnects: u64,
    pub sends_ok: u64,
    pub send_retries: u64,
    pub sends_failed: u64,
    pub live_sessions: usize,
}

impl BrokerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.inner.records_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.inner.records_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Empty value
    pub fn record_skipped(&self) {
        self.inner.records_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// No rule matched and fallback is off
    pub fn record_unrouted(&self) {
        self.inner.records_unrouted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.inner.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.inner.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_attempt(&self) {
        self.inner.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.inner.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_ok(&self) {
        self.inner.sends_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_retry(&self) {
        self.inner.send_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failed(&self) {
        self.inner.sends_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the live per-entity session gauge
    pub fn set_live_sessions(&self, count: usize) {
        self.inner.live_sessions.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.inner;
        MetricsSnapshot {
            records_received: c.records_received.load(Ordering::Relaxed),
            records_dispatched: c.records_dispatched.load(Ordering::Relaxed),
            records_skipped: c.records_skipped.load(Ordering::Relaxed),
            records_unrouted: c.records_unrouted.load(Ordering::Relaxed),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
            handler_failures: c.handler_failures.load(Ordering::Relaxed),
            connect_attempts: c.connect_attempts.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
            sends_ok: c.sends_ok.load(Ordering::Relaxed),
            send_retries: c.send_retries.load(Ordering::Relaxed),
            sends_failed: c.sends_failed.load(Ordering::Relaxed),
            live_sessions: c.live_sessions.load(Ordering::Relaxed),
        }
    }

    /// Render the current values in the Prometheus text format
    #[cfg(feature = "metrics")]
    pub fn render_prometheus(&self) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

        let snapshot = self.snapshot();
        let registry = Registry::new_custom(Some("broker_relay".to_string()), None)?;

        let counters: [(&str, &str, u64); 11] = [
            ("records_received_total", "Records delivered by the broker", snapshot.records_received),
            ("records_dispatched_total", "Records emitted to listeners", snapshot.records_dispatched),
            ("records_skipped_total", "Records with an empty value", snapshot.records_skipped),
            ("records_unrouted_total", "Records matching no rule", snapshot.records_unrouted),
            ("decode_failures_total", "Records the decoder rejected", snapshot.decode_failures),
            ("handler_failures_total", "Listener invocations that failed", snapshot.handler_failures),
            ("connect_attempts_total", "Consumer connect attempts", snapshot.connect_attempts),
            ("reconnects_total", "Consumer reconnect cycles", snapshot.reconnects),
            ("sends_ok_total", "Successful producer sends", snapshot.sends_ok),
            ("send_retries_total", "Producer reconnect-and-resend cycles", snapshot.send_retries),
            ("sends_failed_total", "Producer sends that exhausted retries", snapshot.sends_failed),
        ];

        for (name, help, value) in counters {
            let counter = IntCounter::new(name, help)?;
            counter.inc_by(value);
            registry.register(Box::new(counter))?;
        }

        let live = IntGauge::new("live_sessions", "Live per-entity consumer sessions")?;
        live.set(snapshot.live_sessions as i64);
        registry.register(Box::new(live))?;

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
