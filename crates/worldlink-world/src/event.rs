//! Application events and the handlers that react to them.
//!
//! An event is emitted by one peer (BROADCAST from a client, or directly by
//! the server) and applied to every world that hears of it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use worldlink_protocol::{EntityId, IntoValue, Value, ValueTypeError};

use crate::World;

/// One application-level event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// The entity the event is about.
    pub source: EntityId,
    pub name: String,
    /// Local id of the player that emitted it.
    pub origin: String,
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
}

impl Event {
    pub fn new(source: EntityId, name: impl Into<String>) -> Self {
        Self {
            source,
            name: name.into(),
            origin: String::new(),
            args: Vec::new(),
            kwargs: Vec::new(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl IntoValue) -> Self {
        self.kwargs.push((key.into(), value.into_value()));
        self
    }

    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// The keyword arguments as a wire `Map`.
    pub fn kwargs_value(&self) -> Value {
        Value::map(self.kwargs.iter().cloned())
    }

    /// Reads keyword arguments from a wire `Map`, keeping their order.
    ///
    /// # Errors
    /// Fails if `value` is not a map or a key is not a string.
    pub fn kwargs_from_value(value: Value) -> Result<Vec<(String, Value)>, ValueTypeError> {
        match value {
            Value::Map(pairs) => pairs
                .into_iter()
                .map(|(k, v)| match k {
                    Value::String(k) => Ok((k, v)),
                    other => Err(ValueTypeError {
                        expected: "string key",
                        found: other.kind(),
                    }),
                })
                .collect(),
            other => Err(ValueTypeError {
                expected: "map",
                found: other.kind(),
            }),
        }
    }
}

type Handler = Arc<dyn Fn(&mut World, &Event) + Send + Sync>;

/// Named event handlers.
///
/// Shared between connections behind an `Arc`; handlers can be added at
/// any time.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events called `name`. Several handlers per
    /// name run in registration order.
    pub fn on<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&mut World, &Event) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(name.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Runs every handler registered for `event.name` against `world`.
    /// Returns how many ran.
    pub fn dispatch(&self, world: &mut World, event: &Event) -> usize {
        // Cloned out so a handler may register further handlers.
        let handlers = match self.handlers.read().get(&event.name) {
            Some(handlers) => handlers.clone(),
            None => {
                tracing::trace!(event = %event.name, "no handlers for event");
                return 0;
            }
        };
        for handler in &handlers {
            handler(world, event);
        }
        handlers.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("EventBus")
            .field("events", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_runs_handlers_in_order() {
        let bus = EventBus::new();
        let mut world = World::new();
        let id = world.spawn(None, vec![]).unwrap();

        bus.on("hit", |world, event| {
            world.set(&event.source, "hits", Value::Int32(1)).unwrap();
        });
        bus.on("hit", |world, event| {
            let hits = world.get(event.source.as_str(), "hits").cloned();
            world.set(&event.source, "seen", hits.unwrap_or(Value::Int32(0))).unwrap();
        });

        let ran = bus.dispatch(&mut world, &Event::new(id.clone(), "hit"));
        assert_eq!(ran, 2);
        assert_eq!(world.get(id.as_str(), "seen"), Some(&Value::Int32(1)));
    }

    #[test]
    fn test_dispatch_unknown_event_runs_nothing() {
        let bus = EventBus::new();
        let mut world = World::new();
        assert_eq!(bus.dispatch(&mut world, &Event::new("e".into(), "nope")), 0);
    }

    #[test]
    fn test_kwargs_from_value_rejects_non_string_key() {
        let value = Value::Map(vec![(Value::Int32(1), Value::Int32(2))]);
        assert!(Event::kwargs_from_value(value).is_err());
    }

    #[test]
    fn test_kwargs_value_round_trips() {
        let event = Event::new("e".into(), "jump").with_kwarg("height", 2.5);
        let kwargs = Event::kwargs_from_value(event.kwargs_value()).unwrap();
        assert_eq!(kwargs, event.kwargs);
        assert_eq!(event.kwarg("height"), Some(&Value::Float64(2.5)));
    }
}
