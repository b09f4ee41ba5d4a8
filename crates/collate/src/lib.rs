//! Collate - grouped, sorted and filtered views over live record collections.
//!
//! A [`VirtualCollection`](model::VirtualCollection) observes a collection of
//! records and maintains a flat sequence of entries for list and tree views:
//! synthetic group records derived from a chain of grouping rules, followed
//! by their member records in comparator order. Records failing the filter
//! are left out, and the sequence is kept consistent as records are added,
//! removed, reordered or changed.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use collate::prelude::*;
//!
//! fn main() -> collate::Result<()> {
//!     let ken = Record::with_id(RecordId::new(100), [("name", "Ken")]);
//!     let ann = Record::with_id(RecordId::new(101), [("name", "Ann")]);
//!
//!     let tasks = Arc::new(Collection::new(vec![
//!         Record::with_id(RecordId::new(1), [("title", Value::from("a")), ("assignee", Value::from(&ken))]),
//!         Record::with_id(RecordId::new(2), [("title", Value::from("b")), ("assignee", Value::from(&ann))]),
//!         Record::with_id(RecordId::new(3), [("title", Value::from("c")), ("assignee", Value::from(&ken))]),
//!     ])?);
//!
//!     let by_assignee = VirtualCollection::builder(tasks.clone())
//!         .grouping(
//!             GroupingRule::new()
//!                 .iterator(KeySource::function(|task| match task.get("assignee") {
//!                     Value::Record(user) => user.get("name"),
//!                     _ => Value::Null,
//!                 }))
//!                 .model_factory("assignee")
//!                 .affected_attributes(["assignee"]),
//!         )
//!         .build()?;
//!
//!     // Ken, a, c, Ann, b
//!     assert_eq!(by_assignee.len(), 5);
//!     assert_eq!(by_assignee.at(0).map(|e| e.id()), Some(ken.id()));
//!
//!     by_assignee.signals().reset.connect(|_| println!("regrouped"));
//!     if let Some(task) = tasks.get(RecordId::new(2)) {
//!         task.set("assignee", &ken);
//!     }
//!     assert_eq!(by_assignee.groups().len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! # Logging
//!
//! Collate logs through `tracing` under the `collate` and `collate_core`
//! targets. See [`collate_core::logging`].

pub mod error;
pub mod model;
pub mod prelude;

pub use collate_core::{logging, signal, ConnectionId, PerfSpan, Signal};
pub use error::{CollateError, CollectionError, ConfigError, Result};
