//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Shared utilities (paths, open_db, open_pipeline, Ctrl-C cancellation) and init
//! - `classify` - Classification and correction commands
//! - `training` - Retraining and confusion report commands
//! - `status` - Status, monitor, cache and category commands

pub mod classify;
pub mod core;
pub mod status;
pub mod training;

// Re-export command functions for main.rs
pub use classify::*;
pub use core::*;
pub use status::*;
pub use training::*;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
