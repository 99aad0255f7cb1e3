//! Actions: immutable, typed, time-ordered records of intended state transitions.
//!
//! An [`Action`] wraps an application payload (usually an `enum` of every action kind
//! the application knows about) together with the metadata the store relies on:
//!
//! - `type`: a non-empty string used for filtering, logging and debouncing
//! - `timestamp`: milliseconds since the Unix epoch
//! - `id`: a time-ordered identifier, lexicographically sortable in creation order
//!
//! # Example
//!
//! ```
//! use storex_core::action::{Action, ActionCreator};
//!
//! #[derive(Clone, Debug, PartialEq)]
//! enum CounterAction {
//!     Increment,
//!     Set(i64),
//! }
//!
//! let increment = ActionCreator::new("counter/increment", |()| CounterAction::Increment).unwrap();
//! let set = ActionCreator::new("counter/set", CounterAction::Set).unwrap();
//!
//! let first = increment.call();
//! let second = set.create(10);
//!
//! assert_eq!(first.action_type(), "counter/increment");
//! assert!(first.id() < second.id());
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Payload bound shared by every component that stores or forwards actions.
///
/// Blanket-implemented; never implement it by hand.
pub trait ActionPayload: Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> ActionPayload for T where T: Clone + fmt::Debug + Send + Sync + 'static {}

/// Payload enums that know their own action type.
///
/// Implementing this lets [`Action::of`] derive the `type` field from the variant, so
/// the string and the variant can never disagree.
pub trait ActionKind {
    /// The action type string for this variant.
    fn action_type(&self) -> &'static str;
}

/// Malformed dispatch input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidActionError {
    /// The action type is empty or only whitespace.
    #[error("action type must not be empty")]
    EmptyType,

    /// The action type has leading or trailing whitespace.
    #[error("action type {0:?} has leading or trailing whitespace")]
    PaddedType(String),

    /// A command reached the reducers because no middleware handled it.
    #[error("command dispatched but no middleware handled it")]
    UnhandledCommand,
}

/// The `type` discriminant of an action.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionType(Cow<'static, str>);

impl ActionType {
    /// Create an action type from a static string without allocating.
    #[must_use]
    pub const fn from_static(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }

    /// Create an action type without validating it.
    #[must_use]
    pub fn new(value: impl Into<Cow<'static, str>>) -> Self {
        Self(value.into())
    }

    /// Parse and validate an action type.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidActionError`] if the value is empty or padded with whitespace.
    pub fn parse(value: impl Into<Cow<'static, str>>) -> Result<Self, InvalidActionError> {
        let action_type = Self::new(value);
        action_type.validate()?;
        Ok(action_type)
    }

    /// Check the non-empty, no-padding rule.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidActionError`] if the type is empty or padded with whitespace.
    pub fn validate(&self) -> Result<(), InvalidActionError> {
        let trimmed = self.0.trim();
        if trimmed.is_empty() {
            return Err(InvalidActionError::EmptyType);
        }
        if trimmed.len() != self.0.len() {
            return Err(InvalidActionError::PaddedType(self.0.to_string()));
        }
        Ok(())
    }

    /// The type as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ActionType {
    type Err = InvalidActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.to_string())
    }
}

impl From<&'static str> for ActionType {
    fn from(value: &'static str) -> Self {
        Self::from_static(value)
    }
}

impl From<String> for ActionType {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

impl PartialEq<str> for ActionType {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for ActionType {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// Time-ordered unique action identifier.
///
/// Format: `{millis:012x}-{sequence:04x}-{random:08x}`. The fixed-width hex prefix
/// makes string order match creation order within a process.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ActionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Monotonic `(timestamp, id)` source.
///
/// Packs `millis << 16 | sequence` into one atomic. When the wall clock stands still
/// (or goes backwards) the sequence advances instead, and a sequence overflow borrows
/// the next millisecond, so every call returns a strictly greater pair.
#[derive(Debug)]
pub struct ActionIdGenerator {
    last: AtomicU64,
}

const SEQUENCE_BITS: u32 = 16;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

impl ActionIdGenerator {
    /// Create a generator with no history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Produce the next `(timestamp_ms, id)` pair.
    pub fn next_id(&self) -> (i64, ActionId) {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let mut previous = self.last.load(Ordering::Acquire);
        let packed = loop {
            let candidate = (now << SEQUENCE_BITS).max(previous + 1);
            match self.last.compare_exchange_weak(
                previous,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break candidate,
                Err(actual) => previous = actual,
            }
        };

        let millis = packed >> SEQUENCE_BITS;
        let sequence = packed & SEQUENCE_MASK;
        let suffix: u32 = rand::random();
        let id = ActionId(format!("{millis:012x}-{sequence:04x}-{suffix:08x}"));
        (i64::try_from(millis).unwrap_or(i64::MAX), id)
    }
}

impl Default for ActionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

static IDS: ActionIdGenerator = ActionIdGenerator::new();

/// An immutable action record.
///
/// Fields are private; construct through [`Action::new`], [`Action::of`] or an
/// [`ActionCreator`]. Deserialized actions are not validated until they are
/// dispatched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action<P> {
    #[serde(rename = "type")]
    action_type: ActionType,
    timestamp: i64,
    id: ActionId,
    payload: P,
}

impl<P> Action<P> {
    /// Create a validated action with a fresh timestamp and id.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidActionError`] if the type is empty or padded.
    pub fn new(action_type: impl Into<ActionType>, payload: P) -> Result<Self, InvalidActionError> {
        let action_type = action_type.into();
        action_type.validate()?;
        Ok(Self::stamped(action_type, payload))
    }

    /// Create an action whose type comes from the payload variant.
    #[must_use]
    pub fn of(payload: P) -> Self
    where
        P: ActionKind,
    {
        let action_type = ActionType::from_static(payload.action_type());
        Self::stamped(action_type, payload)
    }

    /// Reassemble an action from stored parts, e.g. when replaying a log.
    #[must_use]
    pub const fn from_parts(action_type: ActionType, timestamp: i64, id: ActionId, payload: P) -> Self {
        Self {
            action_type,
            timestamp,
            id,
            payload,
        }
    }

    fn stamped(action_type: ActionType, payload: P) -> Self {
        let (timestamp, id) = IDS.next_id();
        Self {
            action_type,
            timestamp,
            id,
            payload,
        }
    }

    /// The action type.
    #[must_use]
    pub const fn action_type(&self) -> &ActionType {
        &self.action_type
    }

    /// Creation time in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// The time-ordered identifier.
    #[must_use]
    pub const fn id(&self) -> &ActionId {
        &self.id
    }

    /// The payload.
    #[must_use]
    pub const fn payload(&self) -> &P {
        &self.payload
    }

    /// Consume the action, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> P {
        self.payload
    }

    /// Whether this action has the given type.
    #[must_use]
    pub fn is(&self, action_type: &str) -> bool {
        self.action_type.as_str() == action_type
    }

    /// Validate the action type.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidActionError`] if the type is empty or padded.
    pub fn validate(&self) -> Result<(), InvalidActionError> {
        self.action_type.validate()
    }
}

/// Factory bound to a single action type.
///
/// The type is fixed at construction and exposed through [`ActionCreator::action_type`].
/// For unit inputs use [`ActionCreator::call`]; otherwise [`ActionCreator::create`].
pub struct ActionCreator<P, T = ()> {
    action_type: ActionType,
    build: Arc<dyn Fn(T) -> P + Send + Sync>,
}

impl<P, T> ActionCreator<P, T> {
    /// Bind a type to a payload constructor.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidActionError`] if the type is empty or padded.
    pub fn new<F>(action_type: impl Into<ActionType>, build: F) -> Result<Self, InvalidActionError>
    where
        F: Fn(T) -> P + Send + Sync + 'static,
    {
        let action_type = action_type.into();
        action_type.validate()?;
        Ok(Self {
            action_type,
            build: Arc::new(build),
        })
    }

    /// The type every action from this creator carries.
    #[must_use]
    pub const fn action_type(&self) -> &ActionType {
        &self.action_type
    }

    /// Create an action from the given input.
    pub fn create(&self, input: T) -> Action<P> {
        Action::stamped(self.action_type.clone(), (self.build)(input))
    }

    /// Whether an action was produced by a creator of this type.
    #[must_use]
    pub fn matches(&self, action: &Action<P>) -> bool {
        action.action_type == self.action_type
    }
}

impl<P> ActionCreator<P, ()> {
    /// Create an action for a creator that takes no input.
    pub fn call(&self) -> Action<P> {
        self.create(())
    }
}

impl<P, T> Clone for ActionCreator<P, T> {
    fn clone(&self) -> Self {
        Self {
            action_type: self.action_type.clone(),
            build: Arc::clone(&self.build),
        }
    }
}

impl<P, T> fmt::Debug for ActionCreator<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionCreator")
            .field("action_type", &self.action_type)
            .finish_non_exhaustive()
    }
}

/// Action-type filter used by middleware and effects.
#[derive(Clone, Default)]
pub enum ActionFilter {
    /// Every action matches.
    #[default]
    All,
    /// Only the listed types match.
    Types(Arc<HashSet<String>>),
    /// A predicate over the type string decides.
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl ActionFilter {
    /// Match only the given types.
    pub fn types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Types(Arc::new(types.into_iter().map(Into::into).collect()))
    }

    /// Match with a predicate over the type string.
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(predicate))
    }

    /// Whether the given type passes the filter.
    #[must_use]
    pub fn matches(&self, action_type: &str) -> bool {
        match self {
            Self::All => true,
            Self::Types(types) => types.contains(action_type),
            Self::Predicate(predicate) => predicate(action_type),
        }
    }
}

impl fmt::Debug for ActionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "ActionFilter::All"),
            Self::Types(types) => f.debug_tuple("ActionFilter::Types").field(types).finish(),
            Self::Predicate(_) => write!(f, "ActionFilter::Predicate(<fn>)"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    enum Todo {
        Add(String),
        Clear,
    }

    impl ActionKind for Todo {
        fn action_type(&self) -> &'static str {
            match self {
                Self::Add(_) => "todo/add",
                Self::Clear => "todo/clear",
            }
        }
    }

    #[test]
    fn test_rejects_empty_and_padded_types() {
        assert_eq!(Action::new("", ()).unwrap_err(), InvalidActionError::EmptyType);
        assert_eq!(Action::new("   ", ()).unwrap_err(), InvalidActionError::EmptyType);
        assert_eq!(
            Action::new(" SET", ()).unwrap_err(),
            InvalidActionError::PaddedType(" SET".to_string())
        );
        assert!(Action::new("SET", ()).is_ok());
    }

    #[test]
    fn test_creator_type_is_fixed() {
        let add = ActionCreator::new("todo/add", Todo::Add).unwrap();
        let action = add.create("milk".to_string());

        assert_eq!(add.action_type(), &ActionType::from_static("todo/add"));
        assert_eq!(action.action_type(), "todo/add");
        assert_eq!(action.payload(), &Todo::Add("milk".to_string()));
        assert!(add.matches(&action));
    }

    #[test]
    fn test_creator_rejects_invalid_type() {
        assert!(ActionCreator::new("", |()| Todo::Clear).is_err());
    }

    #[test]
    fn test_action_kind_derives_type() {
        let action = Action::of(Todo::Clear);
        assert!(action.is("todo/clear"));
    }

    #[test]
    fn test_serde_uses_type_field() {
        let action = Action::of(Todo::Add("bread".to_string()));
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "todo/add");

        let back: Action<Todo> = serde_json::from_value(json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn test_deserialized_action_is_validated_later() {
        let json = serde_json::json!({
            "type": "",
            "timestamp": 0,
            "id": "x",
            "payload": "Clear",
        });
        let action: Action<Todo> = serde_json::from_value(json).unwrap();
        assert_eq!(action.validate(), Err(InvalidActionError::EmptyType));
    }

    #[test]
    fn test_filter_variants() {
        let types = ActionFilter::types(["A", "B"]);
        assert!(types.matches("A"));
        assert!(!types.matches("C"));

        let predicate = ActionFilter::predicate(|t| t.starts_with("todo/"));
        assert!(predicate.matches("todo/add"));
        assert!(!predicate.matches("counter/set"));

        assert!(ActionFilter::All.matches("anything"));
    }

    proptest! {
        #[test]
        fn prop_ids_strictly_increase(count in 2usize..200) {
            let creator = ActionCreator::new("tick", |()| ()).unwrap();
            let actions: Vec<_> = (0..count).map(|_| creator.call()).collect();

            for pair in actions.windows(2) {
                let earlier = (pair[0].timestamp(), pair[0].id().clone());
                let later = (pair[1].timestamp(), pair[1].id().clone());
                prop_assert!(earlier < later);
            }
        }

        #[test]
        fn prop_generator_is_monotonic(count in 2usize..500) {
            let generator = ActionIdGenerator::new();
            let mut previous = generator.next_id();
            for _ in 1..count {
                let next = generator.next_id();
                prop_assert!(next.1 > previous.1);
                prop_assert!(next.0 >= previous.0);
                previous = next;
            }
        }
    }
}
