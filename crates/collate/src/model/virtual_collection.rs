//! Grouped, sorted and filtered projection of a live record collection.
//!
//! A [`VirtualCollection`] observes a [`RecordSource`] and keeps a flat
//! sequence of [`Entry`]s consistent with it: group records produced by the
//! configured [`GroupingRule`] chain, followed depth-first by their member
//! records and those records' children.
//!
//! # Synchronisation
//!
//! Most source changes trigger a full rebuild followed by exactly one
//! `reset` notification:
//!
//! - source reset, sort and removal
//! - any change in a record's child collection
//! - attribute changes that can affect grouping, ordering or filtering
//!
//! Inserted records are handled according to `delayed_add`:
//!
//! - `true` (default): the collection is marked pending and
//!   [`VirtualCollection::flush`] performs one batched rebuild.
//! - `false`: the record is spliced into its group and a single `added`
//!   notification is emitted. When the insertion needs a new group, would
//!   change which member a group is derived from, or brings its own child
//!   collection, a full rebuild is done instead.
//!
//! State is fully updated before any notification is emitted. Slots
//! connected to [`VirtualSignals`] may read the virtual collection, but key
//! and filter functions must not, since they run while it is being rebuilt.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use collate::model::{Collection, GroupingRule, Record, RecordId, VirtualCollection};
//!
//! let tasks = Arc::new(Collection::new(vec![
//!     Record::with_id(RecordId::new(1), [("title", "a"), ("status", "open")]),
//!     Record::with_id(RecordId::new(2), [("title", "b"), ("status", "done")]),
//!     Record::with_id(RecordId::new(3), [("title", "c"), ("status", "open")]),
//! ]).unwrap());
//!
//! let view = VirtualCollection::builder(tasks)
//!     .grouping(GroupingRule::by_attribute("status"))
//!     .build()
//!     .unwrap();
//!
//! // open, a, c, done, b
//! assert_eq!(view.len(), 5);
//! assert!(view.at(0).unwrap().is_group());
//! assert_eq!(view.index_of(RecordId::new(3)), Some(2));
//! ```

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use collate_core::logging::{span_names, targets};
use collate_core::{ConnectionId, PerfSpan, Signal};
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};

use super::collection::{Collection, CollectionSignals, RecordSource};
use super::debug::EntryTreeDebug;
use super::grouping::{
    ArenaPass, ArenaStats, GroupArena, GroupPath, GroupRecord, GroupingRule, PathSegment,
    ResolvedRule,
};
use super::key::KeySource;
use super::record::{Record, RecordId, CHILDREN_ATTRIBUTE};
use super::value::Value;
use crate::error::{ConfigError, Result};

/// A filter predicate over records.
pub type FilterFn = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// One row of a virtual collection.
#[derive(Clone)]
pub enum Entry {
    /// A synthetic group record.
    Group(Arc<GroupRecord>),
    /// A source record at the given nesting level.
    Record {
        /// The source record.
        record: Arc<Record>,
        /// Nesting level in the sequence.
        level: usize,
    },
}

impl Entry {
    /// The entry's identity.
    pub fn id(&self) -> RecordId {
        match self {
            Entry::Group(group) => group.id(),
            Entry::Record { record, .. } => record.id(),
        }
    }

    /// Read an attribute of the underlying record.
    pub fn get(&self, name: &str) -> Value {
        match self {
            Entry::Group(group) => group.get(name),
            Entry::Record { record, .. } => record.get(name),
        }
    }

    /// Nesting level: 0 for top-level rows.
    pub fn level(&self) -> usize {
        match self {
            Entry::Group(group) => group.level(),
            Entry::Record { level, .. } => *level,
        }
    }

    /// Returns true for group records.
    pub fn is_group(&self) -> bool {
        matches!(self, Entry::Group(_))
    }

    /// The group record, if this is a group entry.
    pub fn as_group(&self) -> Option<&Arc<GroupRecord>> {
        match self {
            Entry::Group(group) => Some(group),
            Entry::Record { .. } => None,
        }
    }

    /// The source record, if this is a record entry.
    pub fn as_record(&self) -> Option<&Arc<Record>> {
        match self {
            Entry::Group(_) => None,
            Entry::Record { record, .. } => Some(record),
        }
    }
}

/// Entries are equal when they refer to the same record instance at the
/// same level.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Entry::Group(a), Entry::Group(b)) => Arc::ptr_eq(a, b),
            (Entry::Record { record: a, level: la }, Entry::Record { record: b, level: lb }) => {
                Arc::ptr_eq(a, b) && la == lb
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Group(group) => f
                .debug_struct("Group")
                .field("id", &group.id())
                .field("display_text", &group.display_text())
                .field("level", &group.level())
                .finish(),
            Entry::Record { record, level } => f
                .debug_struct("Record")
                .field("id", &record.id())
                .field("level", level)
                .finish(),
        }
    }
}

/// Notifications emitted by a [`VirtualCollection`].
pub struct VirtualSignals {
    /// The whole entry sequence was replaced.
    pub reset: Signal<()>,
    /// One entry was inserted at the given position.
    pub added: Signal<(Entry, usize)>,
    /// One entry was removed from the given position.
    ///
    /// Removals are currently always delivered as `reset`; the signal is
    /// kept so observers can be written against the full event set.
    pub removed: Signal<(Entry, usize)>,
}

impl Default for VirtualSignals {
    fn default() -> Self {
        Self {
            reset: Signal::new(),
            added: Signal::new(),
            removed: Signal::new(),
        }
    }
}

/// Which attribute changes trigger a rebuild.
#[derive(Debug)]
enum Relevance {
    /// Every change.
    Any,
    /// Changes of the listed attributes.
    Attributes(HashSet<String>),
}

impl Relevance {
    fn new(
        grouping: &[ResolvedRule],
        comparator: Option<&KeySource>,
        has_filter: bool,
        watch: Option<Vec<String>>,
    ) -> Self {
        let mut names: HashSet<String> = grouping
            .iter()
            .flat_map(|rule| rule.affected().iter().cloned())
            .collect();
        if let Some(name) = comparator.and_then(KeySource::attribute_name) {
            names.insert(name.to_string());
        }

        let opaque = has_filter
            || comparator.is_some_and(KeySource::is_function)
            || grouping.iter().any(ResolvedRule::reads_any_attribute);

        match watch {
            Some(watch) => {
                names.extend(watch);
                Relevance::Attributes(names)
            }
            None if opaque => Relevance::Any,
            None => Relevance::Attributes(names),
        }
    }

    fn matches(&self, changed: &[String]) -> bool {
        if changed.iter().any(|name| name == CHILDREN_ATTRIBUTE) {
            return true;
        }
        match self {
            Relevance::Any => true,
            Relevance::Attributes(names) => changed.iter().any(|name| names.contains(name)),
        }
    }
}

/// Validated configuration.
struct Config {
    grouping: Vec<ResolvedRule>,
    comparator: Option<KeySource>,
    filter: Option<FilterFn>,
    relevance: Relevance,
    delayed_add: bool,
    group_nested: bool,
}

impl Config {
    fn passthrough() -> Self {
        Self {
            grouping: Vec::new(),
            comparator: None,
            filter: None,
            relevance: Relevance::Attributes(HashSet::new()),
            delayed_add: true,
            group_nested: false,
        }
    }

    fn passes(&self, record: &Record) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter(record))
    }
}

/// The derived sequence and everything kept alongside it.
#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    /// Id to position of its first occurrence, preferring records over
    /// groups.
    index: HashMap<RecordId, usize>,
    arena: GroupArena,
    /// Insertions received since the last rebuild while `delayed_add` is set.
    pending: usize,
}

/// Connection ids on the four signals of one collection.
struct CollectionConnections {
    reset: ConnectionId,
    inserted: ConnectionId,
    removed: ConnectionId,
    sorted: ConnectionId,
}

impl CollectionConnections {
    fn disconnect(&self, signals: &CollectionSignals) {
        signals.reset.disconnect(self.reset);
        signals.inserted.disconnect(self.inserted);
        signals.removed.disconnect(self.removed);
        signals.sorted.disconnect(self.sorted);
    }
}

#[derive(Default)]
struct Subscriptions {
    source: Option<CollectionConnections>,
    records: HashMap<RecordId, (Arc<Record>, ConnectionId)>,
    /// Child collections keyed by address.
    children: HashMap<usize, (Arc<Collection>, CollectionConnections)>,
}

/// Outcome of an attempted incremental insertion.
enum Patch {
    Applied { entry: Entry, position: usize },
    Hidden,
    Rebuild(&'static str),
}

struct Inner<S: RecordSource> {
    source: Arc<S>,
    config: Config,
    state: RwLock<State>,
    subscriptions: Mutex<Subscriptions>,
    signals: VirtualSignals,
}

/// Wrap a handler so it only holds a weak reference to the collection.
fn slot<S, A, F>(weak: Weak<Inner<S>>, handler: F) -> impl Fn(&A) + Send + Sync + 'static
where
    S: RecordSource + 'static,
    A: 'static,
    F: Fn(&Arc<Inner<S>>, &A) + Send + Sync + 'static,
{
    move |args| {
        if let Some(inner) = weak.upgrade() {
            handler(&inner, args);
        }
    }
}

impl<S: RecordSource + 'static> Inner<S> {
    fn connect_source(self: &Arc<Self>) {
        let connections = self.connect_collection(self.source.signals(), "source");
        self.subscriptions.lock().source = Some(connections);
    }

    fn connect_collection(
        self: &Arc<Self>,
        signals: &CollectionSignals,
        origin: &'static str,
    ) -> CollectionConnections {
        let weak = Arc::downgrade(self);
        let is_source = origin == "source";
        CollectionConnections {
            reset: signals
                .reset
                .connect(slot(weak.clone(), move |inner, _: &()| inner.rebuild(origin))),
            inserted: signals.inserted.connect(slot(
                weak.clone(),
                move |inner, (record, index): &(Arc<Record>, usize)| {
                    if is_source {
                        inner.on_inserted(record, *index);
                    } else {
                        inner.rebuild(origin);
                    }
                },
            )),
            removed: signals
                .removed
                .connect(slot(weak.clone(), move |inner, _: &(Arc<Record>, usize)| {
                    inner.rebuild(origin)
                })),
            sorted: signals
                .sorted
                .connect(slot(weak, move |inner, _: &()| inner.rebuild(origin))),
        }
    }

    fn connect_record(self: &Arc<Self>, record: &Record) -> ConnectionId {
        let id = record.id();
        record.signals().changed.connect(slot(
            Arc::downgrade(self),
            move |inner, changed: &Vec<String>| inner.on_record_changed(id, changed),
        ))
    }

    /// Observe `record` together with its child collection and everything
    /// below it, skipping what is already observed.
    fn subscribe_tree(self: &Arc<Self>, record: &Arc<Record>) {
        let mut records = Vec::new();
        let mut collections = Vec::new();
        collect_tree(std::slice::from_ref(record), &mut records, &mut collections);

        let mut subscriptions = self.subscriptions.lock();
        for record in records {
            if !subscriptions.records.contains_key(&record.id()) {
                let connection = self.connect_record(&record);
                subscriptions.records.insert(record.id(), (record, connection));
            }
        }
        for collection in collections {
            let key = collection_key(&collection);
            if !subscriptions.children.contains_key(&key) {
                let connections = self.connect_collection(collection.signals(), "child collection");
                subscriptions.children.insert(key, (collection, connections));
            }
        }
    }

    /// Bring record and child collection subscriptions in line with the
    /// current source tree.
    fn resubscribe(self: &Arc<Self>, roots: &[Arc<Record>]) {
        let mut records = Vec::new();
        let mut collections = Vec::new();
        collect_tree(roots, &mut records, &mut collections);

        let mut subscriptions = self.subscriptions.lock();

        let live: HashSet<RecordId> = records.iter().map(|r| r.id()).collect();
        subscriptions.records.retain(|id, (record, connection)| {
            let keep = live.contains(id);
            if !keep {
                record.signals().changed.disconnect(*connection);
            }
            keep
        });
        for record in records {
            let id = record.id();
            match subscriptions.records.get(&id) {
                Some((existing, _)) if Arc::ptr_eq(existing, &record) => {}
                _ => {
                    if let Some((stale, connection)) = subscriptions.records.remove(&id) {
                        stale.signals().changed.disconnect(connection);
                    }
                    let connection = self.connect_record(&record);
                    subscriptions.records.insert(id, (record, connection));
                }
            }
        }

        let live: HashSet<usize> = collections.iter().map(collection_key).collect();
        subscriptions.children.retain(|key, (collection, connections)| {
            let keep = live.contains(key);
            if !keep {
                connections.disconnect(collection.signals());
            }
            keep
        });
        for collection in collections {
            let key = collection_key(&collection);
            if !subscriptions.children.contains_key(&key) {
                let connections = self.connect_collection(collection.signals(), "child collection");
                subscriptions.children.insert(key, (collection, connections));
            }
        }
    }

    fn disconnect_all(&self) {
        let mut subscriptions = self.subscriptions.lock();
        if let Some(connections) = subscriptions.source.take() {
            connections.disconnect(self.source.signals());
        }
        for (_, (record, connection)) in subscriptions.records.drain() {
            record.signals().changed.disconnect(connection);
        }
        for (_, (collection, connections)) in subscriptions.children.drain() {
            connections.disconnect(collection.signals());
        }
    }

    fn on_record_changed(self: &Arc<Self>, id: RecordId, changed: &[String]) {
        if self.config.relevance.matches(changed) {
            tracing::trace!(target: targets::VIRTUAL_COLLECTION, %id, ?changed, "relevant attribute change");
            self.rebuild("attribute change");
        } else {
            tracing::trace!(target: targets::VIRTUAL_COLLECTION, %id, ?changed, "ignoring attribute change");
        }
    }

    fn on_inserted(self: &Arc<Self>, record: &Arc<Record>, index: usize) {
        if self.config.delayed_add {
            self.state.write().pending += 1;
            self.subscribe_tree(record);
            tracing::trace!(target: targets::VIRTUAL_COLLECTION, id = %record.id(), index, "insertion deferred");
            return;
        }

        match self.patch(record) {
            Patch::Applied { entry, position } => {
                self.subscribe_tree(record);
                tracing::trace!(target: targets::VIRTUAL_COLLECTION, id = %record.id(), position, "record spliced in");
                self.signals.added.emit((entry, position));
            }
            Patch::Hidden => {
                self.subscribe_tree(record);
                tracing::trace!(target: targets::VIRTUAL_COLLECTION, id = %record.id(), "inserted record is filtered out");
            }
            Patch::Rebuild(reason) => {
                tracing::trace!(target: targets::VIRTUAL_COLLECTION, id = %record.id(), reason, "insertion needs a rebuild");
                self.rebuild("insertion");
            }
        }
    }

    /// Replace the entry sequence and emit one `reset`.
    fn rebuild(self: &Arc<Self>, reason: &'static str) {
        let _span = PerfSpan::new(span_names::REBUILD);
        let roots = self.source.records();

        let (len, stats) = {
            let mut state = self.state.write();
            let arena = std::mem::take(&mut state.arena);

            let mut pass = RebuildPass::new(&self.config, arena.begin_pass());
            pass.scope(roots.clone(), &self.config.grouping, &GroupPath::root(), 0);
            let (entries, arena, stats) = pass.finish();

            state.index = index_entries(&entries);
            state.entries = entries;
            state.arena = arena;
            state.pending = 0;

            if tracing::enabled!(target: targets::VIRTUAL_COLLECTION, tracing::Level::TRACE) {
                let tree = EntryTreeDebug::new().format(&state.entries);
                tracing::trace!(target: targets::VIRTUAL_COLLECTION, "entries:\n{tree}");
            }
            (state.entries.len(), stats)
        };

        tracing::debug!(
            target: targets::VIRTUAL_COLLECTION,
            reason,
            entries = len,
            groups = stats.live,
            created = stats.created,
            destroyed = stats.destroyed,
            "rebuilt virtual collection"
        );

        self.resubscribe(&roots);
        self.signals.reset.emit(());
    }

    /// Try to splice a newly inserted source record into the sequence.
    fn patch(&self, record: &Arc<Record>) -> Patch {
        let _span = PerfSpan::new(span_names::PATCH);

        if record.children().is_some_and(|children| !children.is_empty()) {
            return Patch::Rebuild("inserted record has children");
        }
        if !self.config.passes(record) {
            return Patch::Hidden;
        }

        let positions: HashMap<RecordId, usize> = self
            .source
            .records()
            .iter()
            .enumerate()
            .map(|(index, r)| (r.id(), index))
            .collect();
        let Some(&source_index) = positions.get(&record.id()) else {
            return Patch::Rebuild("inserted record is not in the source");
        };

        let mut state = self.state.write();
        if let Some(&existing) = state.index.get(&record.id())
            && !state.entries[existing].is_group()
        {
            return Patch::Rebuild("record is already present");
        }

        // Narrow [start, end) down to the members of the record's innermost group.
        let (mut start, mut end) = (0, state.entries.len());
        let mut path = GroupPath::root();
        for (level, rule) in self.config.grouping.iter().enumerate() {
            path = path.child(PathSegment::Key(rule.key(record)));
            let Some(group) = state.arena.get(&path) else {
                return Patch::Rebuild("group does not exist");
            };
            match positions.get(&group.representative()) {
                Some(&representative) if representative < source_index => {}
                _ => return Patch::Rebuild("group representative changes"),
            }

            let Some(offset) = state.entries[start..end]
                .iter()
                .position(|entry| matches!(entry, Entry::Group(g) if Arc::ptr_eq(g, group)))
            else {
                return Patch::Rebuild("group is not in scope");
            };
            let group_index = start + offset;
            end = state.entries[group_index + 1..end]
                .iter()
                .position(|entry| entry.level() <= level)
                .map_or(end, |offset| group_index + 1 + offset);
            start = group_index + 1;
        }

        let leaf_level = self.config.grouping.len();
        let key = self.config.comparator.as_ref().map(|c| (c, c.extract(record)));
        let mut position = end;
        for (offset, entry) in state.entries[start..end].iter().enumerate() {
            let Entry::Record { record: sibling, level } = entry else {
                continue;
            };
            if *level != leaf_level {
                continue;
            }
            let Some(&sibling_index) = positions.get(&sibling.id()) else {
                return Patch::Rebuild("sibling is no longer in the source");
            };
            let order = match &key {
                Some((comparator, key)) => key.compare(&comparator.extract(sibling)),
                None => Ordering::Equal,
            }
            .then(source_index.cmp(&sibling_index));
            if order == Ordering::Less {
                position = start + offset;
                break;
            }
        }

        let entry = Entry::Record {
            record: record.clone(),
            level: leaf_level,
        };
        state.entries.insert(position, entry.clone());
        for shifted in state.index.values_mut() {
            if *shifted >= position {
                *shifted += 1;
            }
        }
        state.index.insert(record.id(), position);

        Patch::Applied { entry, position }
    }
}

fn collection_key(collection: &Arc<Collection>) -> usize {
    Arc::as_ptr(collection) as usize
}

/// Collect every record and child collection below `records`.
fn collect_tree(
    records: &[Arc<Record>],
    out_records: &mut Vec<Arc<Record>>,
    out_collections: &mut Vec<Arc<Collection>>,
) {
    for record in records {
        out_records.push(record.clone());
        if let Some(children) = record.children() {
            collect_tree(&children.records(), out_records, out_collections);
            out_collections.push(children);
        }
    }
}

/// Map ids to positions. Records take precedence over groups sharing
/// their id.
fn index_entries(entries: &[Entry]) -> HashMap<RecordId, usize> {
    let mut index = HashMap::with_capacity(entries.len());
    for (position, entry) in entries.iter().enumerate() {
        if !entry.is_group() {
            index.entry(entry.id()).or_insert(position);
        }
    }
    for (position, entry) in entries.iter().enumerate() {
        if entry.is_group() {
            index.entry(entry.id()).or_insert(position);
        }
    }
    index
}

/// Stable sort by an extracted key.
fn sort_stable<T>(items: Vec<T>, key: impl Fn(&T) -> Value) -> Vec<T> {
    let mut keyed: Vec<(Value, T)> = items.into_iter().map(|item| (key(&item), item)).collect();
    keyed.sort_by(|a, b| a.0.compare(&b.0));
    keyed.into_iter().map(|(_, item)| item).collect()
}

/// One full rebuild of the entry sequence.
struct RebuildPass<'a> {
    config: &'a Config,
    arena: ArenaPass,
    visible: HashMap<RecordId, bool>,
    entries: Vec<Entry>,
}

impl<'a> RebuildPass<'a> {
    fn new(config: &'a Config, arena: ArenaPass) -> Self {
        Self {
            config,
            arena,
            visible: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// A record is visible if it passes the filter or, when it has
    /// children, if any descendant is visible.
    fn is_visible(&mut self, record: &Record) -> bool {
        if let Some(&visible) = self.visible.get(&record.id()) {
            return visible;
        }
        let visible = self.config.passes(record)
            || record.children().is_some_and(|children| {
                children.records().iter().any(|child| self.is_visible(child))
            });
        self.visible.insert(record.id(), visible);
        visible
    }

    /// Emit `records` grouped by `rules`, starting at `level`.
    fn scope(
        &mut self,
        records: Vec<Arc<Record>>,
        rules: &'a [ResolvedRule],
        path: &GroupPath,
        level: usize,
    ) {
        let visible: Vec<Arc<Record>> = records.into_iter().filter(|r| self.is_visible(r)).collect();

        let Some((rule, rest)) = rules.split_first() else {
            self.leaves(visible, path, level);
            return;
        };

        // Partition by key text, in first-seen order.
        let mut buckets: Vec<(String, Vec<Arc<Record>>)> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();
        for record in visible {
            let key = rule.key(&record);
            match slots.get(&key) {
                Some(&slot) => buckets[slot].1.push(record),
                None => {
                    slots.insert(key.clone(), buckets.len());
                    buckets.push((key, vec![record]));
                }
            }
        }

        if let Some(comparator) = rule.comparator() {
            buckets = sort_stable(buckets, |(_, members)| comparator.extract(&members[0]));
        }

        for (key, members) in buckets {
            let group_path = path.child(PathSegment::Key(key.clone()));
            let representative = &members[0];
            let group = self.arena.obtain(
                group_path.clone(),
                level,
                key,
                rule.identity(representative),
                representative.id(),
            );
            self.entries.push(Entry::Group(group));
            self.scope(members, rest, &group_path, level + 1);
        }
    }

    /// Emit sorted records followed by their children.
    fn leaves(&mut self, records: Vec<Arc<Record>>, path: &GroupPath, level: usize) {
        let config = self.config;
        let records = match &config.comparator {
            Some(comparator) => sort_stable(records, |r| comparator.extract(r)),
            None => records,
        };

        for record in records {
            let id = record.id();
            let children = record.children();
            self.entries.push(Entry::Record { record, level });

            if let Some(children) = children {
                if config.group_nested {
                    let nested = path.child(PathSegment::Children(id));
                    self.scope(children.records(), &config.grouping, &nested, level + 1);
                } else {
                    self.scope(children.records(), &[], path, level + 1);
                }
            }
        }
    }

    fn finish(self) -> (Vec<Entry>, GroupArena, ArenaStats) {
        let (arena, stats) = self.arena.finish();
        (self.entries, arena, stats)
    }
}

/// A grouped, sorted and filtered view over a record source.
///
/// Dropping the virtual collection disconnects it from the source and from
/// every record it observes.
pub struct VirtualCollection<S: RecordSource + 'static> {
    inner: Arc<Inner<S>>,
}

impl<S: RecordSource + 'static> VirtualCollection<S> {
    /// A view showing the source records in source order.
    pub fn new(source: Arc<S>) -> Self {
        Self::with_config(source, Config::passthrough())
    }

    /// Start configuring a view over `source`.
    pub fn builder(source: Arc<S>) -> VirtualCollectionBuilder<S> {
        VirtualCollectionBuilder::new(source)
    }

    fn with_config(source: Arc<S>, config: Config) -> Self {
        let inner = Arc::new(Inner {
            source,
            config,
            state: RwLock::new(State::default()),
            subscriptions: Mutex::new(Subscriptions::default()),
            signals: VirtualSignals::default(),
        });
        inner.connect_source();
        inner.rebuild("initial build");
        Self { inner }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.state.read().entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.state.read().entries.is_empty()
    }

    /// The entry at `index`.
    pub fn at(&self, index: usize) -> Option<Entry> {
        self.inner.state.read().entries.get(index).cloned()
    }

    /// The entry with the given id, at any nesting depth.
    ///
    /// A group identified by a record shares that record's id; when a
    /// source record has the same id, the source record is returned.
    pub fn get(&self, id: RecordId) -> Option<Entry> {
        let state = self.inner.state.read();
        state
            .index
            .get(&id)
            .and_then(|&position| state.entries.get(position))
            .cloned()
    }

    /// Position of the entry with the given id.
    pub fn index_of(&self, id: RecordId) -> Option<usize> {
        self.inner.state.read().index.get(&id).copied()
    }

    /// Nesting level of the entry at `index`.
    pub fn level_at(&self, index: usize) -> Option<usize> {
        self.inner.state.read().entries.get(index).map(Entry::level)
    }

    /// Borrow the entry sequence.
    ///
    /// The guard blocks every update of the view; do not mutate the source
    /// while holding it.
    pub fn entries(&self) -> MappedRwLockReadGuard<'_, [Entry]> {
        RwLockReadGuard::map(self.inner.state.read(), |state| state.entries.as_slice())
    }

    /// The group records in sequence order.
    pub fn groups(&self) -> Vec<Arc<GroupRecord>> {
        self.inner
            .state
            .read()
            .entries
            .iter()
            .filter_map(|entry| entry.as_group().cloned())
            .collect()
    }

    /// Rebuild from the source now. Emits `reset`.
    pub fn rebuild(&self) {
        self.inner.rebuild("explicit rebuild");
    }

    /// Apply deferred insertions with one rebuild.
    ///
    /// Returns false, without notifying, when nothing was pending.
    pub fn flush(&self) -> bool {
        if self.is_pending() {
            self.inner.rebuild("flush");
            true
        } else {
            false
        }
    }

    /// Returns true if deferred insertions await [`flush`](Self::flush).
    pub fn is_pending(&self) -> bool {
        self.inner.state.read().pending > 0
    }

    /// Whether insertions are deferred.
    pub fn delayed_add(&self) -> bool {
        self.inner.config.delayed_add
    }

    /// Access the view's signals.
    pub fn signals(&self) -> &VirtualSignals {
        &self.inner.signals
    }

    /// The observed source.
    pub fn source(&self) -> &Arc<S> {
        &self.inner.source
    }

    /// Render the entries as an indented tree.
    pub fn debug_tree(&self) -> String {
        EntryTreeDebug::new().format(&self.entries())
    }
}

impl<S: RecordSource + 'static> Drop for VirtualCollection<S> {
    fn drop(&mut self) {
        self.inner.disconnect_all();
    }
}

impl<S: RecordSource + 'static> fmt::Debug for VirtualCollection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("VirtualCollection")
            .field("entries", &state.entries)
            .field("pending", &state.pending)
            .finish()
    }
}

/// Builder for [`VirtualCollection`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use collate::model::{Collection, GroupingRule, Record, RecordId, Value, VirtualCollection};
///
/// let tasks = Arc::new(Collection::new(vec![
///     Record::with_id(RecordId::new(1), [("title", Value::from("b")), ("done", Value::from(false))]),
///     Record::with_id(RecordId::new(2), [("title", Value::from("a")), ("done", Value::from(true))]),
///     Record::with_id(RecordId::new(3), [("title", Value::from("c")), ("done", Value::from(false))]),
/// ]).unwrap());
///
/// let open_tasks = VirtualCollection::builder(tasks)
///     .comparator("title")
///     .filter(|task| task.get("done") == Value::from(false))
///     .watch_attributes(["done"])
///     .build()
///     .unwrap();
///
/// let titles: Vec<String> = open_tasks.entries().iter().map(|e| e.get("title").to_string()).collect();
/// assert_eq!(titles, vec!["b", "c"]);
/// ```
pub struct VirtualCollectionBuilder<S: RecordSource> {
    source: Arc<S>,
    grouping: Vec<GroupingRule>,
    comparator: Option<KeySource>,
    filter: Option<FilterFn>,
    watch_attributes: Option<Vec<String>>,
    delayed_add: bool,
    group_nested: bool,
}

impl<S: RecordSource + 'static> VirtualCollectionBuilder<S> {
    /// Creates a new builder with the given source.
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            grouping: Vec::new(),
            comparator: None,
            filter: None,
            watch_attributes: None,
            delayed_add: true,
            group_nested: false,
        }
    }

    /// Append a grouping level, nested inside the previous ones.
    pub fn grouping(mut self, rule: GroupingRule) -> Self {
        self.grouping.push(rule);
        self
    }

    /// Order records within their innermost scope.
    pub fn comparator(mut self, key: impl Into<KeySource>) -> Self {
        self.comparator = Some(key.into());
        self
    }

    /// Show only records for which `f` returns true.
    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(f));
        self
    }

    /// Extra attribute names whose changes trigger a rebuild.
    ///
    /// Without it, a filter, a function comparator, or a grouping rule with
    /// function keys and no affected attributes makes every attribute
    /// change trigger a rebuild. Setting it limits rebuilds to the listed
    /// and inferred attributes.
    pub fn watch_attributes<I, T>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.watch_attributes = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Defer insertions until [`VirtualCollection::flush`] (default true).
    pub fn delayed_add(mut self, delayed: bool) -> Self {
        self.delayed_add = delayed;
        self
    }

    /// Apply the grouping chain inside child collections too (default false).
    pub fn group_nested(mut self, nested: bool) -> Self {
        self.group_nested = nested;
        self
    }

    /// Validate the configuration and build the view.
    pub fn build(self) -> Result<VirtualCollection<S>> {
        let grouping = self
            .grouping
            .iter()
            .enumerate()
            .map(|(index, rule)| rule.resolve(index))
            .collect::<std::result::Result<Vec<_>, ConfigError>>()?;
        if let Some(comparator) = &self.comparator {
            comparator.validate("comparator")?;
        }
        if let Some(names) = &self.watch_attributes
            && names.iter().any(String::is_empty)
        {
            return Err(ConfigError::EmptyAttributeName {
                context: "watchAttributes".to_string(),
            }
            .into());
        }

        let relevance = Relevance::new(
            &grouping,
            self.comparator.as_ref(),
            self.filter.is_some(),
            self.watch_attributes,
        );
        tracing::debug!(target: targets::VIRTUAL_COLLECTION, levels = grouping.len(), ?relevance, "building virtual collection");

        let config = Config {
            grouping,
            comparator: self.comparator,
            filter: self.filter,
            relevance,
            delayed_add: self.delayed_add,
            group_nested: self.group_nested,
        };
        Ok(VirtualCollection::with_config(self.source, config))
    }
}

static_assertions::assert_impl_all!(VirtualCollection<Collection>: Send, Sync);
static_assertions::assert_impl_all!(Entry: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollateError;

    fn task(id: u64, title: &str, status: &str) -> Arc<Record> {
        Record::with_id(
            RecordId::new(id),
            [("title", Value::from(title)), ("status", Value::from(status))],
        )
    }

    fn labels<S: RecordSource + 'static>(view: &VirtualCollection<S>) -> Vec<String> {
        view.entries()
            .iter()
            .map(|entry| match entry {
                Entry::Group(group) => format!("[{}]", group.display_text()),
                Entry::Record { record, .. } => record.get("title").to_string(),
            })
            .collect()
    }

    fn count<A: Clone + Send + 'static>(signal: &Signal<A>) -> Arc<Mutex<usize>> {
        let counter = Arc::new(Mutex::new(0));
        let counter_clone = counter.clone();
        signal.connect(move |_| *counter_clone.lock() += 1);
        counter
    }

    #[test]
    fn test_relevance_inference() {
        let grouping = vec![GroupingRule::by_attribute("status").resolve(0).unwrap()];

        let relevance = Relevance::new(&grouping, Some(&KeySource::attribute("title")), false, None);
        assert!(relevance.matches(&["status".to_string()]));
        assert!(relevance.matches(&["title".to_string()]));
        assert!(!relevance.matches(&["notes".to_string()]));
        assert!(relevance.matches(&[CHILDREN_ATTRIBUTE.to_string()]));

        let relevance = Relevance::new(&grouping, None, true, None);
        assert!(relevance.matches(&["notes".to_string()]));

        let relevance = Relevance::new(&grouping, None, true, Some(vec!["done".to_string()]));
        assert!(relevance.matches(&["done".to_string()]));
        assert!(!relevance.matches(&["notes".to_string()]));

        let by_owner = vec![GroupingRule::new()
            .iterator(KeySource::function(|r| r.get("owner")))
            .resolve(0)
            .unwrap()];
        assert!(Relevance::new(&by_owner, None, false, None).matches(&["owner".to_string()]));
        let narrowed = Relevance::new(&by_owner, None, false, Some(vec!["owner".to_string()]));
        assert!(narrowed.matches(&["owner".to_string()]));
        assert!(!narrowed.matches(&["notes".to_string()]));
    }

    #[test]
    fn test_passthrough_keeps_source_order() {
        let source = Arc::new(
            Collection::new(vec![task(1, "b", "x"), task(2, "a", "y")]).unwrap(),
        );
        let view = VirtualCollection::new(source);

        assert_eq!(labels(&view), vec!["b", "a"]);
        assert_eq!(view.level_at(1), Some(0));
        assert!(view.groups().is_empty());
    }

    #[test]
    fn test_build_rejects_rule_without_iterator() {
        let source = Arc::new(Collection::empty());
        let result = VirtualCollection::builder(source)
            .grouping(GroupingRule::by_attribute("status"))
            .grouping(GroupingRule::new().comparator("title"))
            .build();

        assert!(matches!(
            result,
            Err(CollateError::Config(ConfigError::MissingIterator { index: 1 }))
        ));
    }

    #[test]
    fn test_build_rejects_empty_watch_attribute() {
        let source = Arc::new(Collection::empty());
        let result = VirtualCollection::builder(source).watch_attributes([""]).build();
        assert!(matches!(
            result,
            Err(CollateError::Config(ConfigError::EmptyAttributeName { .. }))
        ));
    }

    #[test]
    fn test_patch_splices_into_existing_group() {
        let source = Arc::new(
            Collection::new(vec![task(1, "b", "open"), task(2, "x", "done")]).unwrap(),
        );
        let view = VirtualCollection::builder(source.clone())
            .grouping(GroupingRule::by_attribute("status"))
            .comparator("title")
            .delayed_add(false)
            .build()
            .unwrap();
        let resets = count(&view.signals().reset);
        let added = Arc::new(Mutex::new(Vec::new()));
        let added_clone = added.clone();
        view.signals().added.connect(move |(entry, position)| {
            added_clone.lock().push((entry.id(), *position));
        });

        source.push(task(3, "a", "open")).unwrap();

        assert_eq!(labels(&view), vec!["[open]", "a", "b", "[done]", "x"]);
        assert_eq!(*added.lock(), vec![(RecordId::new(3), 1)]);
        assert_eq!(*resets.lock(), 0);
        assert_eq!(view.index_of(RecordId::new(1)), Some(2));
        assert_eq!(view.index_of(RecordId::new(2)), Some(4));
    }

    #[test]
    fn test_patch_matches_rebuild() {
        let source = Arc::new(
            Collection::new(vec![task(1, "c", "open"), task(2, "a", "done"), task(3, "a", "open")])
                .unwrap(),
        );
        let view = VirtualCollection::builder(source.clone())
            .grouping(GroupingRule::by_attribute("status"))
            .comparator("title")
            .delayed_add(false)
            .build()
            .unwrap();

        source.insert(3, task(4, "a", "open")).unwrap();
        let patched = labels(&view);
        let patched_ids: Vec<RecordId> = view.entries().iter().map(Entry::id).collect();

        view.rebuild();
        let rebuilt_ids: Vec<RecordId> = view.entries().iter().map(Entry::id).collect();

        assert_eq!(patched, labels(&view));
        assert_eq!(patched_ids, rebuilt_ids);
    }

    #[test]
    fn test_patch_falls_back_when_representative_changes() {
        let source = Arc::new(Collection::new(vec![task(1, "b", "open")]).unwrap());
        let view = VirtualCollection::builder(source.clone())
            .grouping(GroupingRule::by_attribute("status"))
            .delayed_add(false)
            .build()
            .unwrap();
        let resets = count(&view.signals().reset);
        let added = count(&view.signals().added);

        source.insert(0, task(2, "a", "open")).unwrap();

        assert_eq!(*resets.lock(), 1);
        assert_eq!(*added.lock(), 0);
        assert_eq!(labels(&view), vec!["[open]", "a", "b"]);
    }

    #[test]
    fn test_filtered_out_insert_is_silent() {
        let source = Arc::new(Collection::new(vec![task(1, "a", "open")]).unwrap());
        let view = VirtualCollection::builder(source.clone())
            .filter(|r| r.get("status") == Value::from("open"))
            .delayed_add(false)
            .build()
            .unwrap();
        let resets = count(&view.signals().reset);
        let added = count(&view.signals().added);

        source.push(task(2, "b", "done")).unwrap();

        assert_eq!(*resets.lock(), 0);
        assert_eq!(*added.lock(), 0);
        assert_eq!(labels(&view), vec!["a"]);

        // The hidden record is observed and appears once it passes.
        source.get(RecordId::new(2)).unwrap().set("status", "open");
        assert_eq!(labels(&view), vec!["a", "b"]);
        assert_eq!(*resets.lock(), 1);
    }

    #[test]
    fn test_drop_disconnects_everything() {
        let child = Arc::new(Collection::new(vec![task(2, "child", "open")]).unwrap());
        let parent = task(1, "parent", "open");
        parent.set_children(Some(child.clone()));
        let source = Arc::new(Collection::new(vec![parent.clone()]).unwrap());

        let view = VirtualCollection::new(source.clone());
        assert_eq!(source.signals().reset.connection_count(), 1);
        assert_eq!(parent.signals().changed.connection_count(), 1);
        assert_eq!(child.signals().inserted.connection_count(), 1);

        drop(view);

        assert_eq!(source.signals().reset.connection_count(), 0);
        assert_eq!(source.signals().inserted.connection_count(), 0);
        assert_eq!(parent.signals().changed.connection_count(), 0);
        assert_eq!(child.signals().inserted.connection_count(), 0);
        assert_eq!(child.at(0).unwrap().signals().changed.connection_count(), 0);
    }

    #[test]
    fn test_removed_records_are_unsubscribed() {
        let source = Arc::new(
            Collection::new(vec![task(1, "a", "open"), task(2, "b", "open")]).unwrap(),
        );
        let view = VirtualCollection::new(source.clone());

        let removed = source.remove(RecordId::new(2)).unwrap();

        assert_eq!(removed.signals().changed.connection_count(), 0);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_rebuild_logs_with_subscriber() {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter("collate=trace")
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let source = Arc::new(Collection::new(vec![task(1, "a", "open")]).unwrap());
            let view = VirtualCollection::builder(source)
                .grouping(GroupingRule::by_attribute("status"))
                .build()
                .unwrap();
            view.rebuild();
            assert_eq!(view.len(), 2);
        });
    }
}
