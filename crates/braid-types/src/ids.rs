//! Identifier types for the braid scheduler.
//!
//! All deterministic identities (events, flows, actions, bids) are plain
//! values that serialize to JSON for the replay log. Only [`EngineId`] is
//! random, since engine instances exist per process.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for an event: a named, typed slot that flows coordinate over.
///
/// Event identity is the stable string name chosen by user code. Two
/// `EventId`s with the same name refer to the same slot within one engine.
///
/// # Example
///
/// ```
/// use braid_types::EventId;
///
/// let a = EventId::new("user-input");
/// let b = EventId::new("user-input");
/// assert_eq!(a, b);
/// assert_eq!(a.name(), "user-input");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Creates an event id from a stable string name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the event name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "evt:{}", self.0)
    }
}

impl From<&str> for EventId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for EventId {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Identifier for a flow: its path from the root of the flow tree.
///
/// Flows form a single-owner tree. A parent creates named children, so a
/// flow's identity is the ordered list of segment names from the root.
/// Paths are the arena key; no flow holds a reference to another.
///
/// # Example
///
/// ```
/// use braid_types::FlowPath;
///
/// let root = FlowPath::root("app");
/// let child = root.child("login");
/// assert_eq!(child.to_string(), "app/login");
/// assert!(child.starts_with(&root));
/// assert_eq!(child.parent(), Some(root));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowPath(Vec<String>);

impl FlowPath {
    /// Creates a root path with a single segment.
    #[must_use]
    pub fn root(segment: impl Into<String>) -> Self {
        Self(vec![segment.into()])
    }

    /// Returns the path of a named child under this flow.
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Returns the parent path, or `None` for a root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= 1 {
            return None;
        }
        Self(self.0[..self.0.len() - 1].to_vec()).into()
    }

    /// Returns `true` if `self` is `prefix` or a descendant of it.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Returns the last segment (the flow's own name).
    #[must_use]
    pub fn last(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }

    /// Returns the first segment (the root flow's name).
    #[must_use]
    pub fn root_segment(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or("")
    }

    /// Returns the path segments in order.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Returns the tree depth (1 for a root).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl std::fmt::Display for FlowPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Identifier for a processed action.
///
/// Actions are the engine's totally ordered log: exactly one action is
/// processed per scheduling step, and ids are assigned sequentially
/// starting at zero. A replay of the same tree reproduces the same ids.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ActionId(u64);

impl ActionId {
    /// The first action id in a run.
    pub const FIRST: ActionId = ActionId(0);

    /// Creates an action id from its raw sequence number.
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the id following this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw sequence number.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "action:{}", self.0)
    }
}

/// Identifier for a placed bid, unique within its owning flow.
///
/// Bid ids are assigned monotonically each time a flow places bids and
/// are reset only when the flow restarts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BidId(u32);

impl BidId {
    /// Creates a bid id from its raw per-flow number.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the id following this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw per-flow number.
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for BidId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bid:{}", self.0)
    }
}

/// Identifier for an engine instance.
///
/// Each engine owns its own event registry and flow tree; an event id is
/// connected to at most one engine at a time. The id is random because
/// engine instances are per-process runtime objects, never replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineId(Uuid);

#[allow(clippy::new_without_default)] // engines are created by Engine::new, not Default
impl EngineId {
    /// Creates a new random engine id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "engine:{}", self.0)
    }
}
