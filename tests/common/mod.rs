#![allow(dead_code)]

use broker_relay::config::Settings;
use broker_relay::{BrokerContext, EventKind, EventRouter, FlowEvent, MemoryBroker, MemoryNotifier, RetryPolicy};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(5);

/// Reconnect almost immediately
pub fn fast_reconnect() -> RetryPolicy {
    RetryPolicy::unbounded(Duration::from_millis(5))
}

/// Three attempts, a few milliseconds apart
pub fn fast_producer() -> RetryPolicy {
    RetryPolicy::fixed(2, Duration::from_millis(10))
}

pub fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.producer.retry = fast_producer();
    settings.consumer.retry = fast_reconnect();
    settings
}

pub fn context(broker: &MemoryBroker) -> (BrokerContext, Arc<MemoryNotifier>) {
    let notifier = Arc::new(MemoryNotifier::new());
    let context =
        BrokerContext::with_notifier(fast_settings(), Arc::new(broker.clone()), notifier.clone());
    (context, notifier)
}

/// Events seen by a listener
#[derive(Clone, Default)]
pub struct Collected(Arc<Mutex<Vec<FlowEvent>>>);

impl Collected {
    pub fn listen(&self, router: &EventRouter, kind: EventKind) {
        let sink = self.0.clone();
        router.on(kind, move |event| {
            sink.lock().push(event.clone());
            Ok(())
        });
    }

    pub fn events(&self) -> Vec<FlowEvent> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub async fn wait_for(&self, count: usize) -> bool {
        eventually(|| self.len() >= count).await
    }
}

/// Poll `condition` until it holds or [`WAIT`] elapses
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
