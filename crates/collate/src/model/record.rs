//! Records: identified bags of attributes with change notification.
//!
//! A [`Record`] is always shared behind an [`Arc`]. Collections and virtual
//! collections hold references to the same record; nothing is ever copied.
//!
//! Attribute writes that actually change a value emit
//! [`RecordSignals::changed`] with the names of the changed attributes. The
//! notification is sent after the attribute lock has been released, so
//! observers may read the record from inside their slot.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use collate_core::logging::targets;
use collate_core::Signal;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::collection::Collection;
use super::value::Value;
use crate::error::Result;

/// Name reported in change notifications when a record's child collection
/// is replaced.
pub const CHILDREN_ATTRIBUTE: &str = "children";

/// First id handed out by [`RecordId::next`].
///
/// Generated ids live above the 32-bit range so they never collide with
/// small explicit ids chosen by the application.
const FIRST_GENERATED_ID: u64 = 1 << 32;

/// Global counter for generated record ids.
static RECORD_ID_COUNTER: AtomicU64 = AtomicU64::new(FIRST_GENERATED_ID);

/// Stable identity of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    /// Create an id from an explicit value.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate a fresh, process-unique id.
    pub fn next() -> Self {
        Self(RECORD_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signals emitted by a [`Record`].
pub struct RecordSignals {
    /// Emitted after one or more attributes changed, with their names.
    pub changed: Signal<Vec<String>>,
}

impl Default for RecordSignals {
    fn default() -> Self {
        Self {
            changed: Signal::new(),
        }
    }
}

/// A data item with a stable id and a set of named attributes.
///
/// # Example
///
/// ```
/// use collate::model::{Record, RecordId, Value};
///
/// let task = Record::with_id(RecordId::new(1), [("title", "Write docs")]);
/// task.set("done", true);
///
/// assert_eq!(task.get("title"), Value::from("Write docs"));
/// assert_eq!(task.get("done"), Value::from(true));
/// assert!(task.get("missing").is_null());
/// ```
pub struct Record {
    id: RecordId,
    attributes: RwLock<HashMap<String, Value>>,
    children: RwLock<Option<Arc<Collection>>>,
    signals: RecordSignals,
}

impl Record {
    /// Create a record with a generated id.
    pub fn new<K, V>(attributes: impl IntoIterator<Item = (K, V)>) -> Arc<Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::with_id(RecordId::next(), attributes)
    }

    /// Create a record with an explicit id.
    pub fn with_id<K, V>(id: RecordId, attributes: impl IntoIterator<Item = (K, V)>) -> Arc<Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let attributes = attributes
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        Arc::new(Self {
            id,
            attributes: RwLock::new(attributes),
            children: RwLock::new(None),
            signals: RecordSignals::default(),
        })
    }

    /// Create a record from a JSON object of scalar attributes.
    ///
    /// Nested arrays and objects are rejected.
    pub fn from_json(id: RecordId, json: &str) -> Result<Arc<Self>> {
        let attributes: HashMap<String, Value> = serde_json::from_str(json)?;
        Ok(Self::with_id(id, attributes))
    }

    /// The record's identity.
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Read an attribute. Absent attributes read as [`Value::Null`].
    pub fn get(&self, name: &str) -> Value {
        self.attributes.read().get(name).cloned().unwrap_or_default()
    }

    /// Returns true if the attribute has been set.
    pub fn has(&self, name: &str) -> bool {
        self.attributes.read().contains_key(name)
    }

    /// Names of all set attributes, sorted.
    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.attributes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Write an attribute.
    ///
    /// Emits `changed` and returns true only when the stored value actually
    /// changed.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) -> bool {
        let changed = self.set_many([(name.into(), value.into())]);
        !changed.is_empty()
    }

    /// Write several attributes at once.
    ///
    /// A single `changed` notification lists every attribute whose value
    /// changed. Returns those names.
    pub fn set_many<K, V>(&self, values: impl IntoIterator<Item = (K, V)>) -> Vec<String>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut changed = Vec::new();
        {
            let mut attributes = self.attributes.write();
            for (name, value) in values {
                let name = name.into();
                let value = value.into();
                if attributes.get(&name) == Some(&value) {
                    continue;
                }
                attributes.insert(name.clone(), value);
                if !changed.contains(&name) {
                    changed.push(name);
                }
            }
        }

        if !changed.is_empty() {
            tracing::trace!(target: targets::RECORD, id = %self.id, ?changed, "attributes changed");
            self.signals.changed.emit(changed.clone());
        }
        changed
    }

    /// The record's child collection, if it has one.
    pub fn children(&self) -> Option<Arc<Collection>> {
        self.children.read().clone()
    }

    /// Attach, replace or detach the child collection.
    ///
    /// Emits `changed` with [`CHILDREN_ATTRIBUTE`].
    pub fn set_children(&self, children: Option<Arc<Collection>>) {
        *self.children.write() = children;
        tracing::trace!(target: targets::RECORD, id = %self.id, "children replaced");
        self.signals.changed.emit(vec![CHILDREN_ATTRIBUTE.to_string()]);
    }

    /// Access the record's signals.
    pub fn signals(&self) -> &RecordSignals {
        &self.signals
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("attributes", &*self.attributes.read())
            .field("has_children", &self.children.read().is_some())
            .finish()
    }
}

static_assertions::assert_impl_all!(Record: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn record_changes(record: &Record) -> Arc<Mutex<Vec<Vec<String>>>> {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let changes_clone = changes.clone();
        record.signals().changed.connect(move |names| {
            changes_clone.lock().push(names.clone());
        });
        changes
    }

    #[test]
    fn test_get_and_set() {
        let record = Record::with_id(RecordId::new(1), [("title", "a")]);
        assert_eq!(record.id(), RecordId::new(1));
        assert_eq!(record.get("title"), Value::from("a"));
        assert!(record.get("other").is_null());
        assert!(!record.has("other"));

        assert!(record.set("other", 3));
        assert!(record.has("other"));
        assert_eq!(record.attribute_names(), vec!["other", "title"]);
    }

    #[test]
    fn test_set_emits_only_on_change() {
        let record = Record::with_id(RecordId::new(1), [("title", "a")]);
        let changes = record_changes(&record);

        assert!(!record.set("title", "a"));
        assert!(record.set("title", "b"));

        assert_eq!(*changes.lock(), vec![vec!["title".to_string()]]);
    }

    #[test]
    fn test_numerically_equal_write_is_not_a_change() {
        let record = Record::with_id(RecordId::new(1), [("priority", 3)]);
        let changes = record_changes(&record);

        assert!(!record.set("priority", 3.0));
        assert!(record.set("priority", 3.5));

        assert_eq!(*changes.lock(), vec![vec!["priority".to_string()]]);
    }

    #[test]
    fn test_set_many_emits_once() {
        let record = Record::with_id(RecordId::new(1), [("a", 1), ("b", 2)]);
        let changes = record_changes(&record);

        let changed = record.set_many([("a", 1), ("b", 5), ("c", 6)]);

        assert_eq!(changed, vec!["b", "c"]);
        assert_eq!(*changes.lock(), vec![vec!["b".to_string(), "c".to_string()]]);
    }

    #[test]
    fn test_observer_can_read_record_during_notification() {
        let record = Record::with_id(RecordId::new(1), [("count", 0)]);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let weak = Arc::downgrade(&record);
        record.signals().changed.connect(move |_| {
            if let Some(record) = weak.upgrade() {
                seen_clone.lock().push(record.get("count"));
            }
        });

        record.set("count", 1);
        assert_eq!(*seen.lock(), vec![Value::from(1)]);
    }

    #[test]
    fn test_set_children_emits_children_change() {
        let record = Record::with_id(RecordId::new(1), [("title", "parent")]);
        let changes = record_changes(&record);
        let children = Arc::new(Collection::empty());

        record.set_children(Some(children.clone()));

        assert!(record.children().is_some_and(|c| Arc::ptr_eq(&c, &children)));
        assert_eq!(*changes.lock(), vec![vec![CHILDREN_ATTRIBUTE.to_string()]]);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Record::new([("x", 1)]);
        let b = Record::new([("x", 1)]);
        assert_ne!(a.id(), b.id());
        assert!(a.id().get() >= FIRST_GENERATED_ID);
    }

    #[test]
    fn test_from_json() {
        let record = Record::from_json(RecordId::new(9), r#"{"title": "x", "points": 3}"#).unwrap();
        assert_eq!(record.get("title"), Value::from("x"));
        assert_eq!(record.get("points"), Value::from(3));

        assert!(Record::from_json(RecordId::new(10), r#"{"tags": ["a"]}"#).is_err());
    }
}
