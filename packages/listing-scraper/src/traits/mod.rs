//! Seams to the external page-automation collaborator.

pub mod automation;
