//! Typed publish/subscribe for controller lifecycle notifications.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use crate::{ErrorReason, Headers, Payload};

/// The closed set of event kinds a controller emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Finished,
    Error,
}

/// A lifecycle notification with its payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// A logical request produced a non-retryable response.
    Finished {
        code: u16,
        result: Payload,
        headers: Headers,
    },
    /// A logical request ended without a usable response.
    Error { reason: ErrorReason },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Finished { .. } => EventKind::Finished,
            Event::Error { .. } => EventKind::Error,
        }
    }
}

/// Identifies one registered handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<C> = Arc<dyn Fn(&C, &Event) + Send + Sync>;

struct Registry<C> {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(SubscriptionId, Handler<C>)>>,
}

/// Subscriber lists keyed by [`EventKind`].
///
/// `C` is the emitter handed to every handler.
pub struct EventBus<C> {
    registry: Arc<Mutex<Registry<C>>>,
}

impl<C> EventBus<C> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                handlers: HashMap::new(),
            })),
        }
    }

    /// Registers `handler` for `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription<C>
    where
        F: Fn(&C, &Event) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            kind,
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Removes one handler, or every handler for `kind` when `id` is `None`.
    pub fn off(&self, kind: EventKind, id: Option<SubscriptionId>) {
        remove(&mut lock(&self.registry), kind, id);
    }

    /// Invokes the handlers registered for the event's kind.
    ///
    /// The list is snapshotted first: handlers added or removed while the
    /// event is being delivered take effect from the next trigger.
    pub fn trigger(&self, emitter: &C, event: &Event) {
        let snapshot: Vec<Handler<C>> = lock(&self.registry)
            .handlers
            .get(&event.kind())
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        for handler in snapshot {
            handler(emitter, event);
        }
    }

    /// Number of handlers currently registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        lock(&self.registry)
            .handlers
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl<C> Default for EventBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for EventBus<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("EventBus")
            .field("finished", &registry.handlers.get(&EventKind::Finished).map_or(0, Vec::len))
            .field("error", &registry.handlers.get(&EventKind::Error).map_or(0, Vec::len))
            .finish()
    }
}

/// Handle returned by [`EventBus::on`]; removes the handler when asked.
///
/// Dropping the handle keeps the handler registered.
pub struct Subscription<C> {
    kind: EventKind,
    id: SubscriptionId,
    registry: Weak<Mutex<Registry<C>>>,
}

impl<C> Subscription<C> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Removes the handler. A no-op if the bus is gone.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            remove(&mut lock(&registry), self.kind, Some(self.id));
        }
    }
}

impl<C> fmt::Debug for Subscription<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}

fn remove<C>(registry: &mut Registry<C>, kind: EventKind, id: Option<SubscriptionId>) {
    match id {
        Some(id) => {
            if let Some(handlers) = registry.handlers.get_mut(&kind) {
                handlers.retain(|(existing, _)| *existing != id);
            }
        }
        None => {
            registry.handlers.remove(&kind);
        }
    }
}

fn lock<C>(registry: &Mutex<Registry<C>>) -> MutexGuard<'_, Registry<C>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn error_event() -> Event {
        Event::Error {
            reason: ErrorReason::Transport,
        }
    }

    #[test]
    fn trigger_reaches_matching_kind_only() {
        let bus: EventBus<()> = EventBus::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&errors);
        bus.on(EventKind::Error, move |_, _| {
            e.fetch_add(1, Ordering::SeqCst);
        });
        let f = Arc::clone(&finished);
        bus.on(EventKind::Finished, move |_, _| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        bus.trigger(&(), &error_event());

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_receives_emitter() {
        let bus: EventBus<&'static str> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.on(EventKind::Error, move |emitter, event| {
            s.lock().expect("poisoned").push((*emitter, event.clone()));
        });

        bus.trigger(&"poller", &error_event());

        let seen = seen.lock().expect("poisoned");
        assert_eq!(seen.as_slice(), &[("poller", error_event())]);
    }

    #[test]
    fn unsubscribe_handle_removes_only_that_handler() {
        let bus: EventBus<()> = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = Arc::clone(&hits);
        let first = bus.on(EventKind::Error, move |_, _| {
            h1.fetch_add(1, Ordering::SeqCst);
        });
        let h2 = Arc::clone(&hits);
        bus.on(EventKind::Error, move |_, _| {
            h2.fetch_add(10, Ordering::SeqCst);
        });

        first.unsubscribe();
        bus.trigger(&(), &error_event());

        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(bus.handler_count(EventKind::Error), 1);
    }

    #[test]
    fn off_without_id_clears_kind() {
        let bus: EventBus<()> = EventBus::new();
        bus.on(EventKind::Error, |_, _| {});
        bus.on(EventKind::Error, |_, _| {});
        bus.on(EventKind::Finished, |_, _| {});

        bus.off(EventKind::Error, None);

        assert_eq!(bus.handler_count(EventKind::Error), 0);
        assert_eq!(bus.handler_count(EventKind::Finished), 1);
    }

    #[test]
    fn emission_uses_snapshot() {
        let bus: Arc<EventBus<()>> = Arc::new(EventBus::new());
        let late_hits = Arc::new(AtomicUsize::new(0));

        let inner_bus = Arc::clone(&bus);
        let late = Arc::clone(&late_hits);
        bus.on(EventKind::Error, move |_, _| {
            let late = Arc::clone(&late);
            inner_bus.on(EventKind::Error, move |_, _| {
                late.fetch_add(1, Ordering::SeqCst);
            });
        });

        bus.trigger(&(), &error_event());
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);

        bus.trigger(&(), &error_event());
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_after_bus_dropped_is_noop() {
        let bus: EventBus<()> = EventBus::new();
        let subscription = bus.on(EventKind::Finished, |_, _| {});
        drop(bus);
        subscription.unsubscribe();
    }
}
