//! Handler lookup by name.
//!
//! Machines name their handlers; a session supplies the implementations
//! through a [`HandlerRegistry`]. Tests swap individual handlers by
//! registering a replacement under the same name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::event::Event;

/// A state handler. It sees the triggering event and the session context
/// and returns the next event.
pub type Handler<C> = Arc<dyn Fn(&Event, &mut C) -> Event + Send + Sync>;

pub struct HandlerRegistry<C> {
    handlers: HashMap<&'static str, Handler<C>>,
}

impl<C> Default for HandlerRegistry<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C> Clone for HandlerRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<C> HandlerRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any earlier one.
    pub fn register<F>(&mut self, name: &'static str, handler: F)
    where
        F: Fn(&Event, &mut C) -> Event + Send + Sync + 'static,
    {
        self.handlers.insert(name, Arc::new(handler));
    }

    pub fn with<F>(mut self, name: &'static str, handler: F) -> Self
    where
        F: Fn(&Event, &mut C) -> Event + Send + Sync + 'static,
    {
        self.register(name, handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Handler<C>> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_registration_replaces() {
        let registry: HandlerRegistry<Vec<&'static str>> = HandlerRegistry::<Vec<&'static str>>::new()
            .with("a", |_, trace| {
                trace.push("first");
                Event::Ok
            })
            .with("a", |_, trace| {
                trace.push("second");
                Event::Ok
            });
        let mut trace = Vec::new();
        let handler = registry.get("a").unwrap();
        assert_eq!(handler(&Event::Ok, &mut trace), Event::Ok);
        assert_eq!(trace, vec!["second"]);
        assert!(registry.get("b").is_none());
    }
}
