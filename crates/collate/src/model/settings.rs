//! Declarative configuration for virtual collections.
//!
//! Settings describe a configuration using attribute names only, so they can
//! be stored as JSON next to the rest of an application's settings. Filters
//! and key functions are attached on the builder afterwards.
//!
//! ```
//! use std::sync::Arc;
//! use collate::model::{Collection, VirtualCollectionBuilder, VirtualCollectionSettings};
//!
//! let settings = VirtualCollectionSettings::from_json(r#"{
//!     "grouping": [{ "iterator": "status", "comparator": "statusOrder" }],
//!     "comparator": "title",
//!     "delayedAdd": false
//! }"#).unwrap();
//!
//! let view = VirtualCollectionBuilder::from_settings(Arc::new(Collection::empty()), &settings)
//!     .build()
//!     .unwrap();
//! assert!(!view.delayed_add());
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::collection::RecordSource;
use super::grouping::GroupingRule;
use super::virtual_collection::VirtualCollectionBuilder;
use crate::error::Result;

/// One grouping level, by attribute names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupingSettings {
    /// Attribute determining group membership. Required.
    pub iterator: Option<String>,
    /// Attribute ordering sibling groups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparator: Option<String>,
    /// Attribute providing the group identity value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_factory: Option<String>,
    /// Attributes whose changes regroup records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_attributes: Option<Vec<String>>,
}

/// A virtual collection configuration, by attribute names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualCollectionSettings {
    /// Grouping levels, outermost first.
    pub grouping: Vec<GroupingSettings>,
    /// Attribute ordering records within their scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparator: Option<String>,
    /// Extra attributes whose changes trigger a rebuild.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_attributes: Option<Vec<String>>,
    /// Defer insertions until flushed.
    pub delayed_add: bool,
    /// Group child collections too.
    pub group_nested: bool,
}

impl Default for VirtualCollectionSettings {
    fn default() -> Self {
        Self {
            grouping: Vec::new(),
            comparator: None,
            watch_attributes: None,
            delayed_add: true,
            group_nested: false,
        }
    }
}

impl VirtualCollectionSettings {
    /// Parse settings from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize settings to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl From<&GroupingSettings> for GroupingRule {
    fn from(settings: &GroupingSettings) -> Self {
        let mut rule = GroupingRule::new();
        if let Some(iterator) = &settings.iterator {
            rule = rule.iterator(iterator.as_str());
        }
        if let Some(comparator) = &settings.comparator {
            rule = rule.comparator(comparator.as_str());
        }
        if let Some(factory) = &settings.model_factory {
            rule = rule.model_factory(factory.as_str());
        }
        if let Some(names) = &settings.affected_attributes {
            rule = rule.affected_attributes(names.iter().cloned());
        }
        rule
    }
}

impl<S: RecordSource + 'static> VirtualCollectionBuilder<S> {
    /// A builder preconfigured from declarative settings.
    ///
    /// A grouping level without an iterator is reported by
    /// [`build`](Self::build).
    pub fn from_settings(source: Arc<S>, settings: &VirtualCollectionSettings) -> Self {
        let mut builder = Self::new(source)
            .delayed_add(settings.delayed_add)
            .group_nested(settings.group_nested);
        for grouping in &settings.grouping {
            builder = builder.grouping(grouping.into());
        }
        if let Some(comparator) = &settings.comparator {
            builder = builder.comparator(comparator.as_str());
        }
        if let Some(names) = &settings.watch_attributes {
            builder = builder.watch_attributes(names.iter().cloned());
        }
        builder
    }
}
