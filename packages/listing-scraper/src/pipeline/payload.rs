//! Interpreting what the collaborator's `extract` returns.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AutomationError, AutomationResult};
use crate::types::feedback::PageSignal;
use crate::types::pagination::PaginationMethod;

/// One extraction, split into raw records and pagination hints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPage {
    pub products: Vec<Value>,
    pub signal: PageSignal,
    pub next_page_url: Option<String>,
    pub method: Option<PaginationMethod>,
}

#[derive(Debug, Default, Deserialize)]
struct PaginationHints {
    #[serde(default)]
    has_more_pages: Option<bool>,
    #[serde(default)]
    total_pages: Option<u32>,
    #[serde(default)]
    next_page_url: Option<String>,
    #[serde(default)]
    method: Option<PaginationMethod>,
}

impl ExtractedPage {
    /// Accepts `{"products": [...], "pagination": {...}}` or a bare array.
    pub fn from_value(value: Value) -> AutomationResult<Self> {
        match value {
            Value::Array(products) => Ok(Self {
                products,
                ..Self::default()
            }),
            Value::Object(mut obj) => {
                let products = match obj.remove("products") {
                    Some(Value::Array(products)) => products,
                    Some(Value::Null) | None => Vec::new(),
                    Some(other) => {
                        return Err(AutomationError::InvalidPayload(format!(
                            "`products` is not an array: {}",
                            truncate(&other.to_string())
                        )))
                    }
                };
                let hints = match obj.remove("pagination") {
                    Some(Value::Null) | None => PaginationHints::default(),
                    Some(raw) => serde_json::from_value(raw).map_err(|e| {
                        AutomationError::InvalidPayload(format!("bad pagination block: {}", e))
                    })?,
                };
                Ok(Self {
                    products,
                    signal: PageSignal {
                        has_more_pages: hints.has_more_pages,
                        total_pages: hints.total_pages,
                    },
                    next_page_url: hints.next_page_url.filter(|u| !u.trim().is_empty()),
                    method: hints.method,
                })
            }
            other => Err(AutomationError::InvalidPayload(format!(
                "expected object or array, got {}",
                truncate(&other.to_string())
            ))),
        }
    }
}

fn truncate(text: &str) -> String {
    const LIMIT: usize = 120;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let cut: String = text.chars().take(LIMIT).collect();
        format!("{}...", cut)
    }
}

/// JSON schema handed to `extract` for listing pages.
pub fn listing_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "products": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "description": {"type": "string"},
                        "price": {
                            "type": "object",
                            "properties": {
                                "amount": {"type": "number"},
                                "currency": {"type": "string"}
                            },
                            "required": ["amount"]
                        },
                        "image_url": {"type": "string"},
                        "weight": {"type": ["string", "null"]}
                    },
                    "required": ["name", "price", "image_url"]
                }
            },
            "pagination": {
                "type": "object",
                "properties": {
                    "has_more_pages": {"type": "boolean"},
                    "total_pages": {"type": ["integer", "null"]},
                    "next_page_url": {"type": ["string", "null"]},
                    "method": {
                        "type": "string",
                        "enum": ["numbered", "infinite_scroll", "load_more", "offset", "unknown"]
                    }
                }
            }
        },
        "required": ["products"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_payload() {
        let page = ExtractedPage::from_value(json!({
            "products": [{"name": "A"}, {"name": "B"}],
            "pagination": {
                "has_more_pages": true,
                "total_pages": 4,
                "next_page_url": "https://shop.example/toys?page=2",
                "method": "numbered"
            }
        }))
        .unwrap();

        assert_eq!(page.products.len(), 2);
        assert_eq!(page.signal.has_more_pages, Some(true));
        assert_eq!(page.signal.total_pages, Some(4));
        assert_eq!(page.method, Some(PaginationMethod::Numbered));
        assert!(page.next_page_url.is_some());
    }

    #[test]
    fn test_bare_array_has_no_signal() {
        let page = ExtractedPage::from_value(json!([{"name": "A"}])).unwrap();
        assert_eq!(page.products.len(), 1);
        assert_eq!(page.signal, PageSignal::default());
    }

    #[test]
    fn test_invalid_payloads() {
        assert!(matches!(
            ExtractedPage::from_value(json!("no products here")),
            Err(AutomationError::InvalidPayload(_))
        ));
        assert!(matches!(
            ExtractedPage::from_value(json!({"products": 3})),
            Err(AutomationError::InvalidPayload(_))
        ));
    }
}
