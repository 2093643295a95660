//! Persistent storage for the Rapport engagement engine.

pub mod store;

pub use store::{FollowupRow, Store, Table};
