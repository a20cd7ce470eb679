//! Jail identity module
//!
//! This module provides:
//! - Jail records with derived network identity and paths
//! - Phase tracking for create/delete operations

pub mod record;
pub mod state;

// Re-exports
pub use record::{JailLayout, JailRecord, validate_name};
pub use state::{CreateTracker, DeleteTracker};
