//! Data types shared by the stores, the workflow and the batch runner.

pub mod config;
pub mod feedback;
pub mod job;
pub mod pagination;
pub mod product;
pub mod session;
