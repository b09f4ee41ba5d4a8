//! Record model and virtual collections.
//!
//! This module provides the data model a virtual collection works on and the
//! virtual collection itself:
//!
//! - Live records whose attribute changes are observable
//! - Ordered collections announcing inserts, removals, resets and sorts
//! - Grouped, sorted and filtered projections kept in sync with them
//!
//! # Core Types
//!
//! - `Value`: Dynamically typed attribute value
//! - `Record`: Identified set of attributes with change notification
//! - `Collection`: Ordered record collection, implements `RecordSource`
//! - `KeySource`: Attribute name or function used as a key
//! - `GroupingRule`: One level of grouping
//! - `VirtualCollection`: The derived entry sequence
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────┐  inserted/removed  ┌───────────────────┐  reset/added  ┌──────────┐
//! │ Collection  │───────reset───────>│ VirtualCollection │──────────────>│ Observer │
//! │ (Records)   │───────sorted──────>│  GroupArena       │               │          │
//! └─────────────┘                    │  Entry sequence   │<───at/get─────┘          │
//!       │          changed           └───────────────────┘
//!       └──────────(Record)────────────────────^
//! ```
//!
//! The virtual collection only reads the source. It rebuilds its entry
//! sequence from scratch on structural changes and splices single records in
//! when configured for immediate insertion.

mod collection;
mod debug;
mod grouping;
mod key;
mod record;
mod settings;
mod value;
mod virtual_collection;

pub use collection::{Collection, CollectionSignals, RecordSource};
pub use debug::{EntryTreeDebug, TreeFormatOptions, TreeStyle};
pub use grouping::{
    DISPLAY_TEXT_ATTRIBUTE, GROUP_VALUE_ATTRIBUTE, GROUPING_MODEL_ATTRIBUTE, GroupPath,
    GroupRecord, GroupingRule, PathSegment,
};
pub use key::{KeyFn, KeySource};
pub use record::{CHILDREN_ATTRIBUTE, Record, RecordId, RecordSignals};
pub use settings::{GroupingSettings, VirtualCollectionSettings};
pub use value::Value;
pub use virtual_collection::{
    Entry, FilterFn, VirtualCollection, VirtualCollectionBuilder, VirtualSignals,
};
