//! Grouping rules and the synthetic group records they produce.
//!
//! A virtual collection is configured with an ordered chain of
//! [`GroupingRule`]s, outermost first. Each rule partitions the records of
//! its scope by the text of the rule's iterator value and materializes one
//! [`GroupRecord`] per distinct value.
//!
//! Group records are owned by an arena keyed by [`GroupPath`], the
//! chain of keys leading from the root to the group. The arena is carried
//! over from one rebuild to the next, so a group that survives a rebuild
//! keeps its identity.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use super::key::KeySource;
use super::record::{Record, RecordId};
use super::value::Value;
use crate::error::ConfigError;

/// Attribute of a group record holding its display text.
pub const DISPLAY_TEXT_ATTRIBUTE: &str = "displayText";
/// Attribute that is `true` on every group record.
pub const GROUPING_MODEL_ATTRIBUTE: &str = "groupingModel";
/// Attribute of a group record holding its identity value.
pub const GROUP_VALUE_ATTRIBUTE: &str = "value";

/// Describes how one grouping level derives groups from member records.
///
/// # Example
///
/// ```
/// use collate::model::{GroupingRule, KeySource, Value};
///
/// // Group tasks by assignee, show the assignee's name, order by its id.
/// let rule = GroupingRule::new()
///     .iterator(KeySource::function(|task| match task.get("assignee") {
///         Value::Record(user) => user.get("name"),
///         _ => Value::Null,
///     }))
///     .model_factory("assignee")
///     .comparator(KeySource::function(|task| match task.get("assignee") {
///         Value::Record(user) => Value::from(user.id().get() as i64),
///         _ => Value::Null,
///     }))
///     .affected_attributes(["assignee"]);
/// # let _ = rule;
/// ```
#[derive(Clone, Debug, Default)]
pub struct GroupingRule {
    iterator: Option<KeySource>,
    comparator: Option<KeySource>,
    model_factory: Option<KeySource>,
    affected_attributes: Option<Vec<String>>,
}

impl GroupingRule {
    /// An empty rule. An iterator must be set before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// A rule grouping by the value of one attribute.
    pub fn by_attribute(name: impl Into<String>) -> Self {
        Self::new().iterator(KeySource::attribute(name))
    }

    /// Set the key that determines group membership.
    pub fn iterator(mut self, key: impl Into<KeySource>) -> Self {
        self.iterator = Some(key.into());
        self
    }

    /// Set the key that orders sibling groups.
    pub fn comparator(mut self, key: impl Into<KeySource>) -> Self {
        self.comparator = Some(key.into());
        self
    }

    /// Set the key producing a group's identity value.
    pub fn model_factory(mut self, key: impl Into<KeySource>) -> Self {
        self.model_factory = Some(key.into());
        self
    }

    /// Set the attribute names whose changes regroup records.
    pub fn affected_attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affected_attributes = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Validate the rule at position `index` of a chain.
    pub(crate) fn resolve(&self, index: usize) -> Result<ResolvedRule, ConfigError> {
        let iterator = self
            .iterator
            .clone()
            .ok_or(ConfigError::MissingIterator { index })?;
        iterator.validate(&format!("grouping[{index}].iterator"))?;
        if let Some(comparator) = &self.comparator {
            comparator.validate(&format!("grouping[{index}].comparator"))?;
        }
        if let Some(factory) = &self.model_factory {
            factory.validate(&format!("grouping[{index}].modelFactory"))?;
        }

        let keys = [Some(&iterator), self.comparator.as_ref(), self.model_factory.as_ref()];
        let reads_any_attribute =
            self.affected_attributes.is_none() && keys.iter().flatten().any(|key| key.is_function());

        let affected = match &self.affected_attributes {
            Some(names) => {
                if names.iter().any(String::is_empty) {
                    return Err(ConfigError::EmptyAttributeName {
                        context: format!("grouping[{index}].affectedAttributes"),
                    });
                }
                names.iter().cloned().collect()
            }
            None => keys
                .into_iter()
                .flatten()
                .filter_map(KeySource::attribute_name)
                .map(str::to_string)
                .collect(),
        };

        Ok(ResolvedRule {
            model_factory: self.model_factory.clone().unwrap_or_else(|| iterator.clone()),
            iterator,
            comparator: self.comparator.clone(),
            affected,
            reads_any_attribute,
        })
    }
}

/// A validated grouping rule with its defaults filled in.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedRule {
    iterator: KeySource,
    comparator: Option<KeySource>,
    model_factory: KeySource,
    affected: HashSet<String>,
    /// A function key without declared affected attributes may read any
    /// attribute.
    reads_any_attribute: bool,
}

impl ResolvedRule {
    /// The partition key of a record: the text of its iterator value.
    pub(crate) fn key(&self, record: &Record) -> String {
        self.iterator.extract(record).to_string()
    }

    pub(crate) fn comparator(&self) -> Option<&KeySource> {
        self.comparator.as_ref()
    }

    /// The identity value of the group represented by `record`.
    pub(crate) fn identity(&self, record: &Record) -> Value {
        self.model_factory.extract(record)
    }

    pub(crate) fn affected(&self) -> &HashSet<String> {
        &self.affected
    }

    pub(crate) fn reads_any_attribute(&self) -> bool {
        self.reads_any_attribute
    }
}

/// One step of a [`GroupPath`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// A grouping key.
    Key(String),
    /// Descent into the child collection of a record.
    Children(RecordId),
}

/// The chain of keys identifying a group from the root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GroupPath(Vec<PathSegment>);

impl GroupPath {
    /// The empty path of the root scope.
    pub fn root() -> Self {
        Self::default()
    }

    /// This path extended by one segment.
    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    /// The segments from the root.
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

/// A synthetic record standing for one group.
///
/// Group records answer [`get`](Self::get) for `displayText`,
/// `groupingModel` (always `true`) and `value` (the identity value from the
/// model factory). Any other attribute is read from the identity value when
/// that value is a record.
#[derive(Debug)]
pub struct GroupRecord {
    synthetic_id: RecordId,
    path: GroupPath,
    level: usize,
    display_text: String,
    value: RwLock<Value>,
    representative: RwLock<RecordId>,
}

impl GroupRecord {
    /// The group's identity.
    ///
    /// This is the id of the identity value when that value is a record,
    /// otherwise an id that stays stable for the group's path.
    pub fn id(&self) -> RecordId {
        match &*self.value.read() {
            Value::Record(record) => record.id(),
            _ => self.synthetic_id,
        }
    }

    /// The group's path from the root.
    pub fn path(&self) -> &GroupPath {
        &self.path
    }

    /// Nesting level in the entry sequence.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Text derived from the iterator value.
    pub fn display_text(&self) -> &str {
        &self.display_text
    }

    /// The identity value produced by the model factory.
    pub fn value(&self) -> Value {
        self.value.read().clone()
    }

    /// Id of the member the group was derived from: its first member in
    /// source order.
    pub fn representative(&self) -> RecordId {
        *self.representative.read()
    }

    /// Read an attribute.
    pub fn get(&self, name: &str) -> Value {
        match name {
            DISPLAY_TEXT_ATTRIBUTE => Value::from(self.display_text.as_str()),
            GROUPING_MODEL_ATTRIBUTE => Value::Bool(true),
            GROUP_VALUE_ATTRIBUTE => self.value(),
            _ => match &*self.value.read() {
                Value::Record(record) => record.get(name),
                _ => Value::Null,
            },
        }
    }
}

/// Owner of the group records of one virtual collection.
#[derive(Debug, Default)]
pub(crate) struct GroupArena {
    groups: HashMap<GroupPath, Arc<GroupRecord>>,
}

impl GroupArena {
    pub(crate) fn get(&self, path: &GroupPath) -> Option<&Arc<GroupRecord>> {
        self.groups.get(path)
    }

    pub(crate) fn len(&self) -> usize {
        self.groups.len()
    }

    /// Start a rebuild pass that reuses this arena's groups.
    pub(crate) fn begin_pass(self) -> ArenaPass {
        ArenaPass {
            previous: self.groups,
            current: HashMap::new(),
            created: 0,
        }
    }
}

/// Group counts of a finished rebuild pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArenaStats {
    pub live: usize,
    pub created: usize,
    pub destroyed: usize,
}

/// A rebuild pass over a [`GroupArena`].
///
/// Groups obtained during the pass survive it; every group of the previous
/// arena that was not obtained again is destroyed by [`finish`](Self::finish).
pub(crate) struct ArenaPass {
    previous: HashMap<GroupPath, Arc<GroupRecord>>,
    current: HashMap<GroupPath, Arc<GroupRecord>>,
    created: usize,
}

impl ArenaPass {
    /// Reuse or create the group at `path`.
    pub(crate) fn obtain(
        &mut self,
        path: GroupPath,
        level: usize,
        display_text: String,
        value: Value,
        representative: RecordId,
    ) -> Arc<GroupRecord> {
        // A level change means the configuration changed; build a new record.
        let group = match self.previous.remove(&path) {
            Some(group) if group.level == level => {
                *group.value.write() = value;
                *group.representative.write() = representative;
                group
            }
            _ => {
                self.created += 1;
                Arc::new(GroupRecord {
                    synthetic_id: RecordId::next(),
                    path: path.clone(),
                    level,
                    display_text,
                    value: RwLock::new(value),
                    representative: RwLock::new(representative),
                })
            }
        };
        self.current.insert(path, group.clone());
        group
    }

    pub(crate) fn finish(self) -> (GroupArena, ArenaStats) {
        let stats = ArenaStats {
            live: self.current.len(),
            created: self.created,
            destroyed: self.previous.len(),
        };
        (GroupArena { groups: self.current }, stats)
    }
}

static_assertions::assert_impl_all!(GroupRecord: Send, Sync);
