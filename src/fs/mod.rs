//! Destination paths and per-path write exclusion.

mod locks;
mod paths;

pub use locks::PathLocks;
pub use paths::{destination_for_url, fixup_file_path};
