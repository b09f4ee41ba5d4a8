//! Core systems for Collate.
//!
//! This crate provides the observer plumbing the `collate` crate is built on:
//!
//! - **Signal/Slot System**: Type-safe, re-entrant change notification
//! - **Logging**: `tracing` targets, span names and a performance span guard
//!
//! # Signal/Slot Example
//!
//! ```
//! use collate_core::Signal;
//!
//! // Create a signal that notifies when a value changes
//! let value_changed = Signal::<i32>::new();
//!
//! // Connect a slot to handle the signal
//! let conn_id = value_changed.connect(|value| {
//!     println!("Value changed to: {}", value);
//! });
//!
//! // Emit the signal
//! value_changed.emit(42);
//!
//! // Disconnect when done
//! value_changed.disconnect(conn_id);
//! ```

pub mod logging;
pub mod signal;

pub use logging::PerfSpan;
pub use signal::{ConnectionId, Signal};
