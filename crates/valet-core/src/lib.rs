//! # Valet Core
//! Shared error type, configuration, data types, and the capability traits
//! the scheduling core consumes (gateway sender, dispatch store, settings).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::ValetConfig;
pub use error::{Result, ValetError};
