//! A small publish-subscribe registry for the Device Client's `send`/`receive` events.
//!
//! Callbacks receive a read-only hex view of the payload; there is no way for a
//! subscriber to mutate a request before it goes out or a response after it comes back.

/// One registered callback. Boxed so the registry can hold a heterogeneous list.
type Callback = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Callback>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    pub fn publish(&self, hex_payload: &str) {
        for subscriber in &self.subscribers {
            subscriber(hex_payload);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
