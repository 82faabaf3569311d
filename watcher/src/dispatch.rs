//! Routing of classified events to user callbacks.

use std::fmt;

use tracing::debug;

use crate::event::{ClassifiedEvent, EventType};

/// Callback invoked with each event of the type it was registered for.
///
/// Callbacks run synchronously on the engine's task; a slow callback delays
/// every later event.
pub type Callback = Box<dyn FnMut(&ClassifiedEvent) + Send + 'static>;

/// At most one callback per event type, indexed by the type's ordinal.
#[derive(Default)]
pub struct Dispatcher {
    callbacks: [Option<Callback>; EventType::COUNT],
}

impl Dispatcher {
    /// Create a dispatcher with no callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event_type`, replacing any previous one.
    pub fn on<F>(&mut self, event_type: EventType, callback: F)
    where
        F: FnMut(&ClassifiedEvent) + Send + 'static,
    {
        self.callbacks[event_type.index()] = Some(Box::new(callback));
    }

    /// Register a copy of `callback` for each of `event_types`.
    pub fn on_many<F>(&mut self, event_types: &[EventType], callback: F)
    where
        F: FnMut(&ClassifiedEvent) + Clone + Send + 'static,
    {
        for &event_type in event_types {
            self.on(event_type, callback.clone());
        }
    }

    /// Remove the callback for `event_type`, if any.
    pub fn off(&mut self, event_type: EventType) -> Option<Callback> {
        self.callbacks[event_type.index()].take()
    }

    /// Whether a callback is registered for `event_type`.
    pub fn is_registered(&self, event_type: EventType) -> bool {
        self.callbacks[event_type.index()].is_some()
    }

    /// Invoke the callback registered for the event's type.
    ///
    /// Returns whether a callback ran; events without one are dropped.
    pub fn dispatch(&mut self, event: &ClassifiedEvent) -> bool {
        match &mut self.callbacks[event.event_type.index()] {
            Some(callback) => {
                callback(event);
                true
            }
            None => {
                debug!(
                    "no callback for {}, dropping {}",
                    event.event_type,
                    event.path.display()
                );
                false
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<EventType> = EventType::ALL
            .into_iter()
            .filter(|event_type| self.is_registered(*event_type))
            .collect();
        f.debug_struct("Dispatcher")
            .field("registered", &registered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(&'static str, PathBuf)>>>;

    fn recorder(seen: Seen, tag: &'static str) -> impl FnMut(&ClassifiedEvent) + Clone + Send {
        move |event: &ClassifiedEvent| seen.lock().unwrap().push((tag, event.path.clone()))
    }

    #[test]
    fn test_unregistered_type_is_silent_noop() {
        let seen = Seen::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.on(EventType::FileCreated, recorder(Arc::clone(&seen), "created"));

        let ran = dispatcher.dispatch(&ClassifiedEvent::new(EventType::FileModified, "/w/a"));

        assert!(!ran);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_last_registration_wins() {
        let seen = Seen::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.on(EventType::DirCreated, recorder(Arc::clone(&seen), "first"));
        dispatcher.on(EventType::DirCreated, recorder(Arc::clone(&seen), "second"));

        assert!(dispatcher.dispatch(&ClassifiedEvent::new(EventType::DirCreated, "/w/d")));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("second", PathBuf::from("/w/d"))]
        );
    }

    #[test]
    fn test_on_many_and_off() {
        let seen = Seen::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.on_many(
            &[EventType::FileDeleted, EventType::DirDeleted],
            recorder(Arc::clone(&seen), "deleted"),
        );
        assert!(dispatcher.is_registered(EventType::FileDeleted));
        assert!(dispatcher.is_registered(EventType::DirDeleted));

        assert!(dispatcher.off(EventType::FileDeleted).is_some());
        assert!(!dispatcher.dispatch(&ClassifiedEvent::new(EventType::FileDeleted, "/w/f")));
        assert!(dispatcher.dispatch(&ClassifiedEvent::new(EventType::DirDeleted, "/w/d")));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(format!("{dispatcher:?}"), "Dispatcher { registered: [DirDeleted] }");
    }
}
