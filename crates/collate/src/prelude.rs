//! Prelude module for Collate.
//!
//! ```ignore
//! use collate::prelude::*;
//! ```

pub use crate::error::{CollateError, Result};
pub use crate::model::{
    Collection, Entry, GroupRecord, GroupingRule, KeySource, Record, RecordId, RecordSource,
    Value, VirtualCollection, VirtualCollectionBuilder, VirtualCollectionSettings,
};
pub use collate_core::Signal;
