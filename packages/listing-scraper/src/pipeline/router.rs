//! Validation/feedback routing.
//!
//! A pure decision: no IO, no async, just the next action for a page given
//! its validation outcome and attempt counters. Every [`ValidationOutcome`]
//! variant is handled explicitly.

use crate::types::feedback::{RouteDecision, RouteInput, ValidationFeedback, ValidationOutcome};

/// Decide what happens to the page described by `input`.
///
/// - passed: accept, then continue while more pages remain, else complete
/// - failed with attempts left: re-extract carrying the feedback
/// - failed with attempts exhausted: skip the page
/// - tool failure: fatal
pub fn route(input: &RouteInput<'_>) -> RouteDecision {
    match input.outcome {
        ValidationOutcome::Passed { .. } => {
            if more_pages(input) {
                RouteDecision::AcceptAndContinue
            } else {
                RouteDecision::AcceptAndComplete
            }
        }
        ValidationOutcome::Failed {
            issues,
            suggestions,
            ..
        } => {
            if input.extraction_attempts < input.max_extraction_attempts {
                RouteDecision::ReExtract(ValidationFeedback {
                    issues: issues.clone(),
                    suggestions: suggestions.clone(),
                    retry_count: input.extraction_attempts,
                    max_retries: input.max_extraction_attempts,
                })
            } else {
                RouteDecision::SkipPage {
                    more_pages: more_pages(input),
                }
            }
        }
        ValidationOutcome::ToolFailure { message } => RouteDecision::FatalError(message.clone()),
    }
}

/// Whether another page should be visited after the current one.
///
/// `max_pages` caps everything. Inside that cap an explicit
/// `has_more_pages` wins over `total_pages`; with neither signal the
/// listing is treated as finished.
pub fn more_pages(input: &RouteInput<'_>) -> bool {
    if input
        .max_pages
        .is_some_and(|max| input.current_page >= max)
    {
        return false;
    }
    match (input.signal.has_more_pages, input.signal.total_pages) {
        (Some(explicit), _) => explicit,
        (None, Some(total)) => input.current_page < total,
        (None, None) => false,
    }
}
