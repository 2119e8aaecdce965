//! The engine-owned event registry.
//!
//! Events are named slots that flows coordinate over. The registry is the
//! single owner of all event state: current value, connection, and the
//! related-validation set. Nothing outside the reaction dispatcher
//! mutates an event's value.
//!
//! An event is *connected* lazily: the first aggregation pass that sees a
//! bid referencing the id creates the entry. Connection is per engine; a
//! dispatch naming an id this engine never connected is invalid
//! (`BID_NOT_CONNECTED`), which is how cross-engine confusion surfaces.

use braid_types::{EngineId, EventId};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// State of one named event slot.
#[derive(Debug, Clone)]
pub struct Event {
    id: EventId,
    engine: EngineId,
    value: Option<Value>,
    related_validation: BTreeSet<EventId>,
}

impl Event {
    fn new(id: EventId, engine: EngineId) -> Self {
        Self {
            id,
            engine,
            value: None,
            related_validation: BTreeSet::new(),
        }
    }

    /// Returns the event's id.
    #[must_use]
    pub fn id(&self) -> &EventId {
        &self.id
    }

    /// Returns the engine this event is connected to.
    #[must_use]
    pub fn engine(&self) -> EngineId {
        self.engine
    }

    /// Returns the current value, if any action has committed one.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Event ids whose validation verdicts may change when this event
    /// changes: events that share a validating flow with this one.
    /// Recomputed during every aggregation; read-only for tooling.
    #[must_use]
    pub fn related_validation(&self) -> &BTreeSet<EventId> {
        &self.related_validation
    }
}

/// Single-owner map of all events one engine knows about.
#[derive(Debug)]
pub struct EventRegistry {
    engine: EngineId,
    events: BTreeMap<EventId, Event>,
}

impl EventRegistry {
    pub(crate) fn new(engine: EngineId) -> Self {
        Self {
            engine,
            events: BTreeMap::new(),
        }
    }

    /// Connects an event id to this engine, creating the entry if it is
    /// the first bid referencing it.
    pub(crate) fn connect(&mut self, id: &EventId) -> &mut Event {
        let engine = self.engine;
        self.events
            .entry(id.clone())
            .or_insert_with(|| Event::new(id.clone(), engine))
    }

    /// Returns `true` if the id has been connected to this engine.
    #[must_use]
    pub fn is_connected(&self, id: &EventId) -> bool {
        self.events.contains_key(id)
    }

    /// Returns the event entry, if connected.
    #[must_use]
    pub fn get(&self, id: &EventId) -> Option<&Event> {
        self.events.get(id)
    }

    /// Returns the event's current value, if connected and committed.
    #[must_use]
    pub fn value(&self, id: &EventId) -> Option<&Value> {
        self.events.get(id).and_then(Event::value)
    }

    /// Commits a value. Only the reaction dispatcher calls this.
    pub(crate) fn commit(&mut self, id: &EventId, value: Value) {
        self.connect(id).value = Some(value);
    }

    /// Replaces the related-validation set for one event.
    pub(crate) fn set_related_validation(&mut self, id: &EventId, related: BTreeSet<EventId>) {
        self.connect(id).related_validation = related;
    }

    /// Iterates all connected events in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }
}
