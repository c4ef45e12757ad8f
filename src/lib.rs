//! Machine operator managing a mongos router for a sharded MongoDB cluster.
//!
//! Every dispatched event runs the same reconciliation pass: read a full
//! snapshot of the surrounding model, derive the router configuration the
//! cluster currently calls for, plan the actions that close the gap, and
//! execute them against the platform and the local router process.

pub mod backend;
pub mod controller;
pub mod error;
pub mod model;
pub mod process;
pub mod settings;

pub use crate::error::{Error, Result};
