//! Per-target page pipeline.
//!
//! - [`payload`] - shape of the collaborator's extraction output
//! - [`validate`] - turns raw records into validated records plus feedback
//! - [`router`] - pure routing decision after each validation
//! - [`recovery`] - one-shot reinitialization on closed sessions
//! - [`workflow`] - the navigate/extract/validate loop for one target

pub mod payload;
pub mod recovery;
pub mod router;
pub mod validate;
pub mod workflow;

pub use payload::{listing_schema, ExtractedPage};
pub use recovery::SessionGuard;
pub use router::{more_pages, route};
pub use validate::{validate_page, PageValidation};
pub use workflow::{ListingWorkflow, RunEnd, WorkflowOutcome};
