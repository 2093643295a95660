//! Core types, traits, config, and error handling for the Rapport
//! engagement engine.

pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod profile;
pub mod sanitize;
pub mod traits;

pub use config::{shellexpand, Config};
pub use error::EngineError;
