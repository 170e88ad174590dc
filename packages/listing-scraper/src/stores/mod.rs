//! File-backed persistence.
//!
//! - `PaginationStateStore` - per-target progress, used for resume
//! - `SessionStore` - per-target deduplicated product sets with backups

pub(crate) mod fs;
pub mod pagination;
pub mod session;

pub use fs::{encode_component, target_file_name};
pub use pagination::PaginationStateStore;
pub use session::SessionStore;
