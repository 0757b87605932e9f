//! Event model.
//!
//! Every event carries an [`EventHeader`] with a millisecond timestamp, the
//! id of the source that produced it and an optional weak back-reference to
//! the producing object. Events travel through the bus as `Arc<dyn Event>`
//! and are recovered as concrete types through [`EventCast`].

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ConfigurationError;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Weak back-reference to the object that produced an event.
///
/// Holding an event never keeps its producer alive.
#[derive(Clone)]
pub struct SourceRef(Weak<dyn Any + Send + Sync>);

impl SourceRef {
    pub fn new<T: Any + Send + Sync>(source: &Arc<T>) -> Self {
        let weak: Weak<T> = Arc::downgrade(source);
        Self(weak)
    }

    /// The producer, if it is still alive.
    pub fn upgrade(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.0.upgrade()
    }

    /// The producer downcast to `T`, if it is alive and of that type.
    pub fn upgrade_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.upgrade()?.downcast::<T>().ok()
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRef")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Fields common to every event.
#[derive(Clone, Debug)]
pub struct EventHeader {
    timestamp: i64,
    source_id: Arc<str>,
    source: Option<SourceRef>,
}

impl EventHeader {
    /// Header stamped with the current time.
    pub fn new(source_id: impl Into<Arc<str>>) -> Result<Self, ConfigurationError> {
        Self::at(source_id, now_millis())
    }

    /// Header with an explicit timestamp in epoch milliseconds.
    pub fn at(source_id: impl Into<Arc<str>>, timestamp: i64) -> Result<Self, ConfigurationError> {
        let source_id = source_id.into();
        if source_id.is_empty() {
            return Err(ConfigurationError::EmptySourceId);
        }
        Ok(Self {
            timestamp,
            source_id,
            source: None,
        })
    }

    #[must_use]
    pub fn with_source(mut self, source: SourceRef) -> Self {
        self.source = Some(source);
        self
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub(crate) fn shared_source_id(&self) -> Arc<str> {
        Arc::clone(&self.source_id)
    }

    pub fn source(&self) -> Option<&SourceRef> {
        self.source.as_ref()
    }
}

/// Object-safe access to `Any` for event trait objects.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// An immutable notification published on the bus.
///
/// Implementors only need to expose their header. Types that belong to a
/// family of events (so that subscribing to the family type also receives
/// them) override [`Event::extends`].
pub trait Event: AsAny + fmt::Debug {
    fn header(&self) -> &EventHeader;

    fn timestamp(&self) -> i64 {
        self.header().timestamp()
    }

    fn source_id(&self) -> &str {
        self.header().source_id()
    }

    /// Human readable type name used in logs.
    fn event_kind(&self) -> &'static str {
        type_name::<Self>()
    }

    /// Whether this event also belongs to the event family `family`.
    fn extends(&self, _family: TypeId) -> bool {
        false
    }
}

impl dyn Event {
    /// `TypeId` of the concrete event behind the trait object.
    pub fn concrete_type_id(&self) -> TypeId {
        let any: &dyn Any = <Self as AsAny>::as_any(self);
        any.type_id()
    }

    pub fn is<T: Event>(&self) -> bool {
        <Self as AsAny>::as_any(self).is::<T>()
    }

    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        <Self as AsAny>::as_any(self).downcast_ref::<T>()
    }

    pub fn downcast_arc<T: Event>(self: Arc<Self>) -> Option<Arc<T>> {
        if !self.is::<T>() {
            return None;
        }
        <Self as AsAny>::into_any_arc(self).downcast::<T>().ok()
    }

    /// Exact type match, or membership in the family `event_type`.
    pub fn is_instance_of(&self, event_type: &EventType) -> bool {
        self.concrete_type_id() == event_type.id() || self.extends(event_type.id())
    }
}

/// Runtime descriptor of an event type or event family.
#[derive(Clone, Copy, Debug)]
pub struct EventType {
    id: TypeId,
    name: &'static str,
}

impl EventType {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventType {}

impl Hash for EventType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The type a subscription hands to its consumer.
///
/// `dyn Event` receives everything; a concrete event type receives only
/// events that downcast to it.
pub trait EventCast: Send + Sync + 'static {
    /// `None` when every event type is acceptable.
    fn base_type() -> Option<EventType>;

    fn cast(event: Arc<dyn Event>) -> Option<Arc<Self>>;

    fn cast_ref(event: &dyn Event) -> Option<&Self>;

    /// Whether `event` can be handed to a consumer of `Self`.
    fn castable(event: &dyn Event) -> bool {
        Self::cast_ref(event).is_some()
    }
}

impl EventCast for dyn Event {
    fn base_type() -> Option<EventType> {
        None
    }

    fn cast(event: Arc<dyn Event>) -> Option<Arc<Self>> {
        Some(event)
    }

    fn cast_ref(event: &dyn Event) -> Option<&Self> {
        Some(event)
    }
}

impl<T: Event> EventCast for T {
    fn base_type() -> Option<EventType> {
        Some(EventType::of::<T>())
    }

    fn cast(event: Arc<dyn Event>) -> Option<Arc<Self>> {
        event.downcast_arc::<T>()
    }

    fn cast_ref(event: &dyn Event) -> Option<&Self> {
        event.downcast_ref::<T>()
    }
}
