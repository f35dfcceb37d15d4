//! Common types and helpers used by all other modules.

pub mod error;
pub mod file;

pub use self::error::Error;
