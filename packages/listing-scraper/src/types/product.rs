//! The standardized product record and its normalization rules.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

lazy_static! {
    static ref HTML_TAG: Regex = Regex::new(r"<[^>]+>").unwrap();
    static ref PRICE_NUMBER: Regex = Regex::new(r"\d[\d.,]*").unwrap();
}

const SUPPORTED_CURRENCIES: [&str; 3] = ["GBP", "USD", "EUR"];
const DEFAULT_CURRENCY: &str = "GBP";

/// Price of a product. `amount` is always > 0 and rounded to 2 decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: f64,
    pub currency: String,
}

impl Price {
    pub fn new(amount: f64, currency: &str) -> Result<Self, RecordIssue> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(RecordIssue::InvalidPrice(amount.to_string()));
        }
        let upper = currency.trim().to_uppercase();
        let currency = if SUPPORTED_CURRENCIES.contains(&upper.as_str()) {
            upper
        } else {
            DEFAULT_CURRENCY.to_string()
        };
        Ok(Self {
            amount: (amount * 100.0).round() / 100.0,
            currency,
        })
    }

    /// Amount in integer minor units, used for identity comparison.
    pub fn cents(&self) -> i64 {
        (self.amount * 100.0).round() as i64
    }
}

/// A product as persisted in session files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub name: String,
    pub description: String,
    pub price: Price,
    pub image_url: String,
    pub category: String,
    pub vendor: String,
    #[serde(default)]
    pub weight: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

/// Deduplication identity: normalized name, price in cents, vendor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProductKey {
    name: String,
    cents: i64,
    vendor: String,
}

/// Why a raw record could not become a [`ProductRecord`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordIssue {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing product name")]
    MissingName,

    #[error("missing price")]
    MissingPrice,

    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("missing image URL")]
    MissingImage,

    #[error("image URL is not http(s): {0}")]
    InvalidImageUrl(String),

    #[error("empty category")]
    EmptyCategory,

    #[error("empty vendor")]
    EmptyVendor,
}

impl RecordIssue {
    /// Short label used to group issues across a page.
    pub fn label(&self) -> &'static str {
        match self {
            RecordIssue::NotAnObject => "malformed record",
            RecordIssue::MissingName => "missing name",
            RecordIssue::MissingPrice | RecordIssue::InvalidPrice(_) => "missing or invalid price",
            RecordIssue::MissingImage | RecordIssue::InvalidImageUrl(_) => {
                "missing or invalid image URL"
            }
            RecordIssue::EmptyCategory => "empty category",
            RecordIssue::EmptyVendor => "empty vendor",
        }
    }

    /// Instruction hint fed back to the collaborator on re-extraction.
    pub fn suggestion(&self) -> &'static str {
        match self {
            RecordIssue::NotAnObject => "Return each product as an object with named fields",
            RecordIssue::MissingName => "Include the full product title for every product",
            RecordIssue::MissingPrice | RecordIssue::InvalidPrice(_) => {
                "Read the current selling price shown next to each product as a number greater than zero"
            }
            RecordIssue::MissingImage | RecordIssue::InvalidImageUrl(_) => {
                "Include the absolute http(s) URL of each product's main image"
            }
            RecordIssue::EmptyCategory | RecordIssue::EmptyVendor => {
                "Extract products from the listing itself, not from navigation menus"
            }
        }
    }
}

impl ProductRecord {
    /// Build a normalized record from a loosely-shaped collaborator record.
    pub fn from_raw(raw: &Value, vendor: &str, category: &str) -> Result<Self, RecordIssue> {
        let obj = raw.as_object().ok_or(RecordIssue::NotAnObject)?;
        let field = |keys: &[&str]| -> Option<String> {
            keys.iter().find_map(|k| obj.get(*k).and_then(text_of))
        };

        let price = parse_price(obj.get("price"))?;

        let name = field(&["title", "name", "product_name"])
            .map(|n| collapse_whitespace(&n))
            .filter(|n| !n.is_empty())
            .ok_or(RecordIssue::MissingName)?;

        let description = field(&["description", "summary", "details"])
            .map(|d| clean_description(&d))
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| name.clone());

        let image = match obj.get("images").and_then(Value::as_array) {
            Some(images) if !images.is_empty() => match &images[0] {
                Value::Object(img) => ["url", "src"]
                    .iter()
                    .find_map(|k| img.get(*k).and_then(text_of)),
                other => text_of(other),
            },
            _ => field(&["image_url", "image", "thumbnail"]),
        };
        let image_url = normalize_image_url(image.as_deref().ok_or(RecordIssue::MissingImage)?)?;

        let weight = field(&["weight", "size", "dimensions"])
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty());

        let vendor = vendor.trim().to_lowercase();
        if vendor.is_empty() {
            return Err(RecordIssue::EmptyVendor);
        }
        let category = title_case(category.trim());
        if category.is_empty() {
            return Err(RecordIssue::EmptyCategory);
        }

        Ok(Self {
            name,
            description,
            price,
            image_url,
            category,
            vendor,
            weight,
            scraped_at: Utc::now(),
        })
    }

    pub fn key(&self) -> ProductKey {
        ProductKey {
            name: collapse_whitespace(&self.name).to_lowercase(),
            cents: self.price.cents(),
            vendor: self.vendor.trim().to_lowercase(),
        }
    }

    /// Ordering used to pick between two records sharing a key.
    pub fn completeness(&self) -> (bool, usize) {
        (self.weight.is_some(), self.description.chars().count())
    }

    /// Data quality in [0, 1] over eight checks.
    pub fn quality_score(&self) -> f64 {
        let checks = [
            !self.name.trim().is_empty(),
            self.description.trim().chars().count() > 10,
            self.price.amount > 0.0,
            self.image_url.starts_with("http"),
            !self.category.trim().is_empty(),
            !self.vendor.trim().is_empty(),
            self.weight.is_some(),
            self.description.chars().count() > 50,
        ];
        checks.iter().filter(|c| **c).count() as f64 / checks.len() as f64
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_price(value: Option<&Value>) -> Result<Price, RecordIssue> {
    match value {
        Some(Value::Object(obj)) => {
            let amount = ["amount", "current", "value"]
                .iter()
                .find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
                .ok_or(RecordIssue::MissingPrice)?;
            let currency = obj
                .get("currency")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_CURRENCY);
            Price::new(amount_of(amount)?, currency)
        }
        Some(Value::Null) | None => Err(RecordIssue::MissingPrice),
        Some(other) => Price::new(amount_of(other)?, DEFAULT_CURRENCY),
    }
}

fn amount_of(value: &Value) -> Result<f64, RecordIssue> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| RecordIssue::InvalidPrice(n.to_string())),
        Value::String(s) => {
            parse_amount(s).ok_or_else(|| RecordIssue::InvalidPrice(s.clone()))
        }
        other => Err(RecordIssue::InvalidPrice(other.to_string())),
    }
}

/// First number in a price string: "£1,299.99", "12,99 €", "1.299,99 EUR".
///
/// When both separators appear, the later one is the decimal mark. A lone
/// comma is decimal only with one or two digits after it, and thousands
/// groups must be exactly three digits. Anything else is rejected.
fn parse_amount(text: &str) -> Option<f64> {
    let token = PRICE_NUMBER
        .find(text)?
        .as_str()
        .trim_end_matches(['.', ',']);

    let last_comma = token.rfind(',');
    let last_dot = token.rfind('.');
    let (decimal, thousands) = match (last_comma, last_dot) {
        (None, None) => return token.parse().ok(),
        (Some(c), Some(d)) if c > d => (Some(','), Some('.')),
        (Some(_), Some(_)) => (Some('.'), Some(',')),
        (Some(c), None) => {
            let fraction = token.len() - c - 1;
            if token.matches(',').count() == 1 && (1..=2).contains(&fraction) {
                (Some(','), None)
            } else {
                (None, Some(','))
            }
        }
        (None, Some(d)) => {
            let fraction = token.len() - d - 1;
            if token.matches('.').count() > 1 && fraction == 3 {
                (None, Some('.'))
            } else {
                (Some('.'), None)
            }
        }
    };

    let (whole, fraction) = match decimal {
        Some(mark) => {
            let (whole, fraction) = token.rsplit_once(mark)?;
            if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            (whole, Some(fraction))
        }
        None => (token, None),
    };

    let integer = match thousands {
        Some(sep) => {
            let groups: Vec<&str> = whole.split(sep).collect();
            let well_formed = groups.iter().all(|g| g.chars().all(|c| c.is_ascii_digit()))
                && (1..=3).contains(&groups[0].len())
                && groups[1..].iter().all(|g| g.len() == 3);
            if !well_formed {
                return None;
            }
            groups.concat()
        }
        None => whole.to_string(),
    };
    if integer.is_empty() || !integer.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    match fraction {
        Some(fraction) => format!("{}.{}", integer, fraction).parse().ok(),
        None => integer.parse().ok(),
    }
}

fn normalize_image_url(url: &str) -> Result<String, RecordIssue> {
    let url = url.trim();
    if let Some(rest) = url.strip_prefix("//") {
        return Ok(format!("https://{}", rest));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.to_string())
    } else {
        Err(RecordIssue::InvalidImageUrl(url.to_string()))
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_description(text: &str) -> String {
    collapse_whitespace(&HTML_TAG.replace_all(text, " "))
}

pub(crate) fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_alpha = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}
