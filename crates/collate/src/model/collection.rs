//! Ordered record collections and the source interface virtual collections
//! observe.
//!
//! [`RecordSource`] is the seam between a virtual collection and whatever
//! holds the records. [`Collection`] is the thread-safe implementation
//! shipped with the crate; it is also the type used for a record's child
//! collection.
//!
//! All structural notifications are emitted after the collection's lock has
//! been released, so observers can read the collection from their slots.

use std::sync::Arc;

use collate_core::logging::targets;
use collate_core::Signal;
use parking_lot::RwLock;

use super::key::KeySource;
use super::record::{Record, RecordId};
use crate::error::CollectionError;

/// Structural notifications of a record collection.
pub struct CollectionSignals {
    /// The whole content was replaced.
    pub reset: Signal<()>,
    /// A record was inserted at the given position.
    pub inserted: Signal<(Arc<Record>, usize)>,
    /// A record was removed from the given position.
    pub removed: Signal<(Arc<Record>, usize)>,
    /// The records were reordered.
    pub sorted: Signal<()>,
}

impl Default for CollectionSignals {
    fn default() -> Self {
        Self {
            reset: Signal::new(),
            inserted: Signal::new(),
            removed: Signal::new(),
            sorted: Signal::new(),
        }
    }
}

/// An ordered source of records that announces structural changes.
///
/// Implementors must emit the matching [`CollectionSignals`] after every
/// mutation, once their own state is consistent.
pub trait RecordSource: Send + Sync {
    /// Snapshot of the records in order.
    fn records(&self) -> Vec<Arc<Record>>;

    /// Number of records.
    fn len(&self) -> usize {
        self.records().len()
    }

    /// Returns true if there are no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The collection's structural signals.
    fn signals(&self) -> &CollectionSignals;
}

/// A thread-safe ordered collection of records with unique ids.
///
/// # Example
///
/// ```
/// use collate::model::{Collection, Record, RecordId};
///
/// let tasks = Collection::empty();
/// tasks.push(Record::with_id(RecordId::new(1), [("title", "a")])).unwrap();
/// tasks.push(Record::with_id(RecordId::new(2), [("title", "b")])).unwrap();
///
/// assert_eq!(tasks.len(), 2);
/// assert!(tasks.get(RecordId::new(2)).is_some());
/// ```
pub struct Collection {
    records: RwLock<Vec<Arc<Record>>>,
    signals: CollectionSignals,
}

impl Collection {
    /// Create a collection holding `records`.
    ///
    /// Fails if two records share an id.
    pub fn new(records: Vec<Arc<Record>>) -> Result<Self, CollectionError> {
        check_unique(&records)?;
        Ok(Self {
            records: RwLock::new(records),
            signals: CollectionSignals::default(),
        })
    }

    /// Create an empty collection.
    pub fn empty() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            signals: CollectionSignals::default(),
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Snapshot of the records in order.
    pub fn records(&self) -> Vec<Arc<Record>> {
        self.records.read().clone()
    }

    /// The record at `index`.
    pub fn at(&self, index: usize) -> Option<Arc<Record>> {
        self.records.read().get(index).cloned()
    }

    /// The record with the given id.
    pub fn get(&self, id: RecordId) -> Option<Arc<Record>> {
        self.records.read().iter().find(|r| r.id() == id).cloned()
    }

    /// Position of the record with the given id.
    pub fn position(&self, id: RecordId) -> Option<usize> {
        self.records.read().iter().position(|r| r.id() == id)
    }

    /// Append a record.
    pub fn push(&self, record: Arc<Record>) -> Result<(), CollectionError> {
        let index = {
            let mut records = self.records.write();
            if records.iter().any(|r| r.id() == record.id()) {
                return Err(CollectionError::DuplicateRecord(record.id()));
            }
            records.push(record.clone());
            records.len() - 1
        };

        tracing::trace!(target: targets::COLLECTION, id = %record.id(), index, "record inserted");
        self.signals.inserted.emit((record, index));
        Ok(())
    }

    /// Insert a record at `index`.
    pub fn insert(&self, index: usize, record: Arc<Record>) -> Result<(), CollectionError> {
        {
            let mut records = self.records.write();
            if index > records.len() {
                return Err(CollectionError::IndexOutOfBounds {
                    index,
                    len: records.len(),
                });
            }
            if records.iter().any(|r| r.id() == record.id()) {
                return Err(CollectionError::DuplicateRecord(record.id()));
            }
            records.insert(index, record.clone());
        }

        tracing::trace!(target: targets::COLLECTION, id = %record.id(), index, "record inserted");
        self.signals.inserted.emit((record, index));
        Ok(())
    }

    /// Remove the record with the given id.
    pub fn remove(&self, id: RecordId) -> Result<Arc<Record>, CollectionError> {
        let index = self.position(id).ok_or(CollectionError::RecordNotFound(id))?;
        self.remove_at(index)
    }

    /// Remove the record at `index`.
    pub fn remove_at(&self, index: usize) -> Result<Arc<Record>, CollectionError> {
        let record = {
            let mut records = self.records.write();
            if index >= records.len() {
                return Err(CollectionError::IndexOutOfBounds {
                    index,
                    len: records.len(),
                });
            }
            records.remove(index)
        };

        tracing::trace!(target: targets::COLLECTION, id = %record.id(), index, "record removed");
        self.signals.removed.emit((record.clone(), index));
        Ok(record)
    }

    /// Replace the whole content.
    pub fn reset(&self, records: Vec<Arc<Record>>) -> Result<(), CollectionError> {
        check_unique(&records)?;
        let len = records.len();
        *self.records.write() = records;

        tracing::trace!(target: targets::COLLECTION, len, "collection reset");
        self.signals.reset.emit(());
        Ok(())
    }

    /// Stable-sort the records by a key.
    pub fn sort_by_key(&self, key: &KeySource) {
        {
            let mut records = self.records.write();
            let mut keyed: Vec<_> = records.drain(..).map(|r| (key.extract(&r), r)).collect();
            keyed.sort_by(|a, b| a.0.compare(&b.0));
            records.extend(keyed.into_iter().map(|(_, r)| r));
        }

        tracing::trace!(target: targets::COLLECTION, ?key, "collection sorted");
        self.signals.sorted.emit(());
    }

    /// Access the collection's signals.
    pub fn signals(&self) -> &CollectionSignals {
        &self.signals
    }
}

impl RecordSource for Collection {
    fn records(&self) -> Vec<Arc<Record>> {
        Collection::records(self)
    }

    fn len(&self) -> usize {
        Collection::len(self)
    }

    fn signals(&self) -> &CollectionSignals {
        &self.signals
    }
}

impl Default for Collection {
    fn default() -> Self {
        Self::empty()
    }
}

fn check_unique(records: &[Arc<Record>]) -> Result<(), CollectionError> {
    let mut seen = std::collections::HashSet::with_capacity(records.len());
    for record in records {
        if !seen.insert(record.id()) {
            return Err(CollectionError::DuplicateRecord(record.id()));
        }
    }
    Ok(())
}

static_assertions::assert_impl_all!(Collection: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn record(id: u64, title: &str) -> Arc<Record> {
        Record::with_id(RecordId::new(id), [("title", title)])
    }

    fn titles(collection: &Collection) -> Vec<String> {
        collection
            .records()
            .iter()
            .map(|r| r.get("title").to_string())
            .collect()
    }

    #[test]
    fn test_push_and_lookup() {
        let collection = Collection::empty();
        collection.push(record(1, "a")).unwrap();
        collection.push(record(2, "b")).unwrap();

        assert_eq!(collection.len(), 2);
        assert_eq!(collection.at(1).map(|r| r.id()), Some(RecordId::new(2)));
        assert_eq!(collection.position(RecordId::new(2)), Some(1));
        assert!(collection.get(RecordId::new(3)).is_none());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let collection = Collection::new(vec![record(1, "a")]).unwrap();
        assert_eq!(
            collection.push(record(1, "again")),
            Err(CollectionError::DuplicateRecord(RecordId::new(1)))
        );
        assert!(Collection::new(vec![record(1, "a"), record(1, "b")]).is_err());
    }

    #[test]
    fn test_insert_out_of_bounds() {
        let collection = Collection::empty();
        assert_eq!(
            collection.insert(2, record(1, "a")),
            Err(CollectionError::IndexOutOfBounds { index: 2, len: 0 })
        );
    }

    #[test]
    fn test_signals_report_positions() {
        let collection = Collection::new(vec![record(1, "a"), record(2, "b")]).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));

        let events_clone = events.clone();
        collection.signals().inserted.connect(move |(record, index)| {
            events_clone.lock().push(format!("insert {} at {}", record.id(), index));
        });
        let events_clone = events.clone();
        collection.signals().removed.connect(move |(record, index)| {
            events_clone.lock().push(format!("remove {} at {}", record.id(), index));
        });

        collection.insert(1, record(3, "c")).unwrap();
        collection.remove(RecordId::new(1)).unwrap();

        assert_eq!(*events.lock(), vec!["insert 3 at 1", "remove 1 at 0"]);
        assert_eq!(titles(&collection), vec!["c", "b"]);
    }

    #[test]
    fn test_remove_missing_record() {
        let collection = Collection::empty();
        assert_eq!(
            collection.remove(RecordId::new(5)).map(|r| r.id()),
            Err(CollectionError::RecordNotFound(RecordId::new(5)))
        );
    }

    #[test]
    fn test_reset_emits_once() {
        let collection = Collection::new(vec![record(1, "a")]).unwrap();
        let resets = Arc::new(Mutex::new(0));

        let resets_clone = resets.clone();
        collection.signals().reset.connect(move |_| *resets_clone.lock() += 1);

        collection.reset(vec![record(2, "x"), record(3, "y")]).unwrap();

        assert_eq!(*resets.lock(), 1);
        assert_eq!(titles(&collection), vec!["x", "y"]);
    }

    #[test]
    fn test_sort_by_key_is_stable() {
        let collection = Collection::new(vec![
            Record::with_id(RecordId::new(1), [("rank", 2)]),
            Record::with_id(RecordId::new(2), [("rank", 1)]),
            Record::with_id(RecordId::new(3), [("rank", 2)]),
        ])
        .unwrap();
        let sorted = Arc::new(Mutex::new(0));

        let sorted_clone = sorted.clone();
        collection.signals().sorted.connect(move |_| *sorted_clone.lock() += 1);

        collection.sort_by_key(&KeySource::attribute("rank"));

        let ids: Vec<u64> = collection.records().iter().map(|r| r.id().get()).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        assert_eq!(*sorted.lock(), 1);
    }

    #[test]
    fn test_observer_can_read_collection_during_notification() {
        let collection = Arc::new(Collection::empty());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&collection);
        let seen_clone = seen.clone();
        collection.signals().inserted.connect(move |_| {
            if let Some(collection) = weak.upgrade() {
                seen_clone.lock().push(collection.len());
            }
        });

        collection.push(record(1, "a")).unwrap();
        collection.push(record(2, "b")).unwrap();

        assert_eq!(*seen.lock(), vec![1, 2]);
    }
}
