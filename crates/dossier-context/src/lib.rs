//! # dossier-context
//!
//! Pure merge and diff engine for per-engineer context documents.
//!
//! Nothing in this crate performs I/O or holds state, so every function is
//! safe to call from any number of workers at once.
//!
//! ## Example
//!
//! ```rust,ignore
//! use dossier_context::{diff_contexts, merge};
//!
//! let result = merge(&stored_json, &response)?;
//! if result.has_conflicts() {
//!     // raise a clarification question
//! }
//! let diff = diff_contexts(&stored_json, &result.merged)?;
//! ```

pub mod diff;
pub mod document;
pub mod merge;

pub use diff::{diff_contexts, diff_contexts_at};
pub use document::{ContextDocument, ContextMeta, EntityField, ListSlot, SUMMARY_KEY};
pub use merge::{merge, merge_at, validate_name, MergeResult};
