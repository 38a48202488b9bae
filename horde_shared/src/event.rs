//! Typed event bus.
//!
//! Stages push gameplay events here as they happen during a tick. The
//! simulation drains them once at the end of the tick into its report, so
//! nothing outlives the tick that produced it.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

trait EventQueue: Send + Sync {
    fn len(&self) -> usize;
    fn clear(&mut self);
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: 'static + Send + Sync> EventQueue for Vec<E> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn clear(&mut self) {
        Vec::clear(self);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Per-type FIFO queues of events.
#[derive(Default)]
pub struct EventBus {
    queues: HashMap<TypeId, Box<dyn EventQueue>>,
}

impl EventBus {
    /// Pushes an event onto its type's queue.
    pub fn push<E: 'static + Send + Sync>(&mut self, event: E) {
        let queue = self
            .queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<E>::new()));
        if let Some(queue) = queue.as_any_mut().downcast_mut::<Vec<E>>() {
            queue.push(event);
        }
    }

    /// Drains all queued events of a type, oldest first.
    pub fn drain<E: 'static + Send + Sync>(&mut self) -> Vec<E> {
        self.queues
            .get_mut(&TypeId::of::<E>())
            .and_then(|queue| queue.as_any_mut().downcast_mut::<Vec<E>>())
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Total number of queued events across all types.
    pub fn pending(&self) -> usize {
        self.queues.values().map(|q| q.len()).sum()
    }

    /// Drops every queued event.
    pub fn clear(&mut self) {
        for queue in self.queues.values_mut() {
            queue.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Kill(u32);

    #[derive(Debug, PartialEq)]
    struct Collect(&'static str);

    #[test]
    fn drains_per_type_in_order() {
        let mut bus = EventBus::default();
        bus.push(Kill(1));
        bus.push(Collect("a"));
        bus.push(Kill(2));
        assert_eq!(bus.pending(), 3);
        assert_eq!(bus.drain::<Kill>(), vec![Kill(1), Kill(2)]);
        assert_eq!(bus.pending(), 1);
        assert!(bus.drain::<Kill>().is_empty());
        bus.clear();
        assert!(bus.drain::<Collect>().is_empty());
    }
}
