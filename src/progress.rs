//! Job progress bus.
//!
//! A process-wide publish/subscribe registry keyed by job id, injected
//! (as an `Arc<ProgressBus>`) into both the orchestrator and the SSE
//! endpoint rather than living in a global. Publishing synchronously
//! invokes every handler registered for the key, in registration order;
//! there is no queueing or replay — a handler registered after an event
//! was published never sees it. Once the last handler for a key is
//! removed, the key itself is dropped so finished jobs leak nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::models::ProgressEvent;

type Handler = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    handler: Handler,
}

/// Token returned by [`ProgressBus::subscribe`]; pass it back to
/// [`ProgressBus::unsubscribe`]. Unsubscribing twice is a no-op.
#[derive(Debug, Clone)]
pub struct Subscription {
    job_id: String,
    id: u64,
}

/// RAII wrapper that unsubscribes when dropped. The SSE endpoint holds
/// one per connection so a client disconnect releases its handler.
pub struct SubscriptionGuard {
    bus: Arc<ProgressBus>,
    subscription: Subscription,
}

impl SubscriptionGuard {
    pub fn new(bus: Arc<ProgressBus>, subscription: Subscription) -> Self {
        Self { bus, subscription }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.subscription);
    }
}

#[derive(Default)]
pub struct ProgressBus {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for all future events on `job_id`.
    pub fn subscribe(
        &self,
        job_id: &str,
        handler: impl Fn(&ProgressEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.entry(job_id.to_string()).or_default().push(Subscriber {
            id,
            handler: Arc::new(handler),
        });

        Subscription {
            job_id: job_id.to_string(),
            id,
        }
    }

    /// Remove one handler. Safe to call repeatedly or after the key is
    /// already gone. Empty keys are removed so the map cannot grow
    /// unboundedly across jobs.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(handlers) = subscribers.get_mut(&subscription.job_id) {
            handlers.retain(|s| s.id != subscription.id);
            if handlers.is_empty() {
                subscribers.remove(&subscription.job_id);
            }
        }
    }

    /// Deliver `event` to every handler currently registered for `job_id`.
    ///
    /// The handler list is snapshotted before invocation, so a handler may
    /// subscribe or unsubscribe (including itself) while events are being
    /// delivered without poisoning the iteration.
    pub fn publish(&self, job_id: &str, event: &ProgressEvent) {
        let handlers: Vec<Handler> = {
            let subscribers = self.subscribers.lock().unwrap();
            match subscribers.get(job_id) {
                Some(list) => list.iter().map(|s| s.handler.clone()).collect(),
                None => return,
            }
        };

        for handler in handlers {
            handler(event);
        }
    }

    /// Number of live handlers for a key. Zero means the key is gone.
    pub fn handler_count(&self, job_id: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(job_id)
            .map(|list| list.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn event(message: &str, progress: u8) -> ProgressEvent {
        ProgressEvent::new(message, progress, None)
    }

    #[test]
    fn delivers_in_publish_order() {
        let bus = ProgressBus::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));

        let seen_in = seen.clone();
        let _sub = bus.subscribe("job-1", move |e| {
            seen_in.lock().unwrap().push(e.message.clone());
        });

        bus.publish("job-1", &event("first", 10));
        bus.publish("job-1", &event("second", 20));

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn late_subscriber_sees_nothing() {
        let bus = ProgressBus::new();
        bus.publish("job-1", &event("done", 100));

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_in = seen.clone();
        let _sub = bus.subscribe("job-1", move |e| {
            seen_in.lock().unwrap().push(e.message.clone());
        });

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn keys_are_isolated() {
        let bus = ProgressBus::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));

        let seen_in = seen.clone();
        let _sub = bus.subscribe("job-a", move |e| {
            seen_in.lock().unwrap().push(e.message.clone());
        });

        bus.publish("job-b", &event("other job", 50));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unsubscribe_is_idempotent_and_collects_key() {
        let bus = ProgressBus::new();
        let sub = bus.subscribe("job-1", |_| {});
        assert_eq!(bus.handler_count("job-1"), 1);

        bus.unsubscribe(&sub);
        assert_eq!(bus.handler_count("job-1"), 0);

        // Second removal of the same token is harmless.
        bus.unsubscribe(&sub);
        assert_eq!(bus.handler_count("job-1"), 0);
    }

    #[test]
    fn handler_may_unsubscribe_during_delivery() {
        let bus = Arc::new(ProgressBus::new());
        let slot: Arc<StdMutex<Option<Subscription>>> = Arc::new(StdMutex::new(None));

        let bus_in = bus.clone();
        let slot_in = slot.clone();
        let sub = bus.subscribe("job-1", move |_| {
            if let Some(sub) = slot_in.lock().unwrap().take() {
                bus_in.unsubscribe(&sub);
            }
        });
        *slot.lock().unwrap() = Some(sub);

        bus.publish("job-1", &event("tick", 10));
        assert_eq!(bus.handler_count("job-1"), 0);

        // Nothing left to deliver to.
        bus.publish("job-1", &event("tock", 20));
    }

    #[test]
    fn guard_unsubscribes_on_drop() {
        let bus = Arc::new(ProgressBus::new());
        let sub = bus.subscribe("job-1", |_| {});
        let guard = SubscriptionGuard::new(bus.clone(), sub);
        assert_eq!(bus.handler_count("job-1"), 1);

        drop(guard);
        assert_eq!(bus.handler_count("job-1"), 0);
    }

    #[test]
    fn multiple_handlers_all_receive() {
        let bus = ProgressBus::new();
        let count = Arc::new(StdMutex::new(0u32));

        let (c1, c2) = (count.clone(), count.clone());
        let _a = bus.subscribe("job-1", move |_| *c1.lock().unwrap() += 1);
        let _b = bus.subscribe("job-1", move |_| *c2.lock().unwrap() += 1);

        bus.publish("job-1", &event("tick", 10));
        assert_eq!(*count.lock().unwrap(), 2);
    }
}
