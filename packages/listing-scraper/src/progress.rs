//! Operator-facing progress lines.

use crate::types::pagination::PaginationState;
use crate::types::product::title_case;

/// `"Vendor/category - Page 3 of 10 - Products: 42"`.
///
/// Falls back to `"Page 3 (max 5)"` when only a page limit is known, and to
/// `"Page 3"` when neither is.
pub fn format_progress(state: &PaginationState) -> String {
    let page_info = match (state.total_pages, state.max_pages) {
        (Some(total), _) => format!("Page {} of {}", state.current_page, total),
        (None, Some(max)) => format!("Page {} (max {})", state.current_page, max),
        (None, None) => format!("Page {}", state.current_page),
    };
    format!(
        "{}/{} - {} - Products: {}",
        title_case(&state.vendor),
        state.category,
        page_info,
        state.products_scraped
    )
}

/// Time left for the remaining pages at `secs_per_page`.
///
/// Returns `None` when neither `total_pages` nor `max_pages` is known.
pub fn estimate_eta(state: &PaginationState, secs_per_page: f64) -> Option<String> {
    let last_page = state.total_pages.or(state.max_pages)?;
    let remaining = i64::from(last_page) - i64::from(state.current_page);
    if remaining <= 0 {
        return Some("Complete".to_string());
    }

    let eta = (remaining as f64 * secs_per_page.max(0.0)) as u64;
    Some(if eta < 60 {
        format!("{}s", eta)
    } else if eta < 3600 {
        format!("{}m", eta / 60)
    } else {
        format!("{}h {}m", eta / 3600, (eta % 3600) / 60)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(current: u32, total: Option<u32>, max: Option<u32>) -> PaginationState {
        let mut state = PaginationState::new("s1", "asda", "fruit", max);
        state.current_page = current;
        state.total_pages = total;
        state.products_scraped = 42;
        state
    }

    #[test]
    fn test_format_progress() {
        assert_eq!(
            format_progress(&state(3, Some(10), Some(5))),
            "Asda/fruit - Page 3 of 10 - Products: 42"
        );
        assert_eq!(
            format_progress(&state(3, None, Some(5))),
            "Asda/fruit - Page 3 (max 5) - Products: 42"
        );
        assert_eq!(
            format_progress(&state(3, None, None)),
            "Asda/fruit - Page 3 - Products: 42"
        );
    }

    #[test]
    fn test_estimate_eta() {
        assert_eq!(estimate_eta(&state(1, None, None), 10.0), None);
        assert_eq!(estimate_eta(&state(5, Some(5), None), 10.0), Some("Complete".into()));
        assert_eq!(estimate_eta(&state(7, Some(10), None), 15.0), Some("45s".into()));
        assert_eq!(estimate_eta(&state(1, None, Some(25)), 30.0), Some("12m".into()));
        assert_eq!(estimate_eta(&state(1, Some(14), None), 300.0), Some("1h 5m".into()));
    }
}
