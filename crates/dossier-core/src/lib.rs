//! # dossier-core
//!
//! Core types, traits, and abstractions for dossier.
//!
//! This crate provides the data model, error type, defaults, and the
//! collaborator traits every other dossier crate depends on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
