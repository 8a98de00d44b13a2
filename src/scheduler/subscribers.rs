//! Tick events and the ordered subscriber list

use uuid::Uuid;

/// Deregistration token returned by `on_tick`.
pub type SubscriptionId = Uuid;

/// Callback invoked once per emitted tick.
pub type TickCallback = Box<dyn FnMut(&TickEvent) + Send>;

/// One beat boundary, delivered synchronously and never queued.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickEvent {
    /// 0-based beat index within the current session.
    pub beat: u64,
    /// Clock reading at emission, in ms.
    pub at_ms: f64,
    /// Beat interval in force when the tick fired.
    pub interval_ms: f64,
}

impl TickEvent {
    /// Alternating flag for a visual flash: on for even beats.
    pub fn flash(&self) -> bool {
        self.beat % 2 == 0
    }
}

#[derive(Default)]
pub struct TickSubscribers {
    entries: Vec<(SubscriptionId, TickCallback)>,
}

impl TickSubscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, callback: TickCallback) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.add_with_id(id, callback);
        id
    }

    /// Register under a caller-chosen id. An id already present is replaced
    /// in place, keeping its position.
    pub fn add_with_id(&mut self, id: SubscriptionId, callback: TickCallback) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => entry.1 = callback,
            None => self.entries.push((id, callback)),
        }
    }

    /// Returns false if `id` was not registered (already removed or unknown).
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    /// Call every subscriber in registration order.
    pub fn emit(&mut self, event: &TickEvent) {
        for (_, callback) in self.entries.iter_mut() {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
