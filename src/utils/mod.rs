//! Shared utility functions for keyword-forge.
//!
//! Currently holds the structured-response repair parser used by every
//! pipeline phase.

pub mod json_repair;

pub use json_repair::{
    find_container_end, parse_typed, remove_trailing_separators, repair_json, strip_fences,
    Repaired,
};
