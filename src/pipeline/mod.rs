//! Poll pipeline.
//!
//! - `reconcile`: turn one poll's snapshots into alerts and cache updates
//! - `scheduler`: fetch, parse and reconcile on a fixed interval

pub mod reconcile;
pub mod scheduler;

pub use reconcile::{ReconcileReport, Reconciler};
pub use scheduler::{Tracker, error_chain};
