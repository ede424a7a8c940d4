//! Dispatch module for delivering captured key events
//!
//! A single background worker drains the shared event buffer and invokes
//! listener callbacks in arrival order:
//! - Idle: buffer empty, waiting up to one poll interval
//! - Dispatching: delivering exactly one event, then re-checking at once

mod dispatcher;

pub use dispatcher::{DispatchError, DispatchStats, Dispatcher};
