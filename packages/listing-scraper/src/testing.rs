//! Testing utilities: a scripted automation collaborator and record fixtures.
//!
//! These let applications exercise the workflow and the batch runner
//! without a browser. Pages are addressed the way the workflow reaches
//! them: the category URL is page 1, a scripted next-page URL maps to its
//! page, and a "page N" act instruction jumps to page N.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::error::{AutomationError, AutomationResult};
use crate::traits::automation::{AutomationFactory, ElementDescriptor, PageAutomation};
use crate::types::job::BatchJob;
use crate::types::product::{Price, ProductRecord};

/// Record of a call made to [`ScriptedAutomation`].
#[derive(Debug, Clone, PartialEq)]
pub enum AutomationCall {
    Navigate { url: String },
    Act { instruction: String },
    Observe { instruction: String },
    Extract { page: u32, instruction: String },
    Reinitialize,
    Close,
}

#[derive(Default)]
struct Script {
    current_page: u32,
    url_pages: HashMap<String, u32>,
    page_payloads: HashMap<u32, Value>,
    page_sequences: HashMap<u32, VecDeque<AutomationResult<Value>>>,
    extraction_failure: Option<AutomationError>,
    navigation_failures: VecDeque<AutomationError>,
    act_failures: VecDeque<AutomationError>,
    reinitialize_failure: Option<AutomationError>,
    overlays: Vec<ElementDescriptor>,
    extract_delay: Option<Duration>,
    calls: Vec<AutomationCall>,
}

/// A deterministic in-memory collaborator.
///
/// Clones share the same script and call log.
#[derive(Clone, Default)]
pub struct ScriptedAutomation {
    script: Arc<Mutex<Script>>,
}

impl ScriptedAutomation {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Payload returned by every extraction on `page`.
    pub fn with_page(self, page: u32, payload: Value) -> Self {
        self.script().page_payloads.insert(page, payload);
        self
    }

    /// Responses returned in order by extractions on `page`, before falling
    /// back to the `with_page` payload.
    pub fn with_page_sequence(self, page: u32, responses: Vec<AutomationResult<Value>>) -> Self {
        self.script()
            .page_sequences
            .insert(page, responses.into_iter().collect());
        self
    }

    /// Make `url` lead to `page` when navigated to.
    pub fn with_page_url(self, url: impl Into<String>, page: u32) -> Self {
        self.script().url_pages.insert(url.into(), page);
        self
    }

    /// Overlays reported by the first observation.
    pub fn with_overlays(self, overlays: Vec<ElementDescriptor>) -> Self {
        self.script().overlays = overlays;
        self
    }

    /// Delay every extraction.
    pub fn with_extract_delay(self, delay: Duration) -> Self {
        self.script().extract_delay = Some(delay);
        self
    }

    /// Fail the next `times` navigations with `error`.
    pub fn fail_navigation_with(self, error: AutomationError, times: usize) -> Self {
        self.script()
            .navigation_failures
            .extend(std::iter::repeat(error).take(times));
        self
    }

    /// Fail the next `times` acts with `error`.
    pub fn fail_act_with(self, error: AutomationError, times: usize) -> Self {
        self.script()
            .act_failures
            .extend(std::iter::repeat(error).take(times));
        self
    }

    /// Fail every extraction with `error`.
    pub fn fail_extractions_with(self, error: AutomationError) -> Self {
        self.script().extraction_failure = Some(error);
        self
    }

    pub fn fail_reinitialize_with(self, error: AutomationError) -> Self {
        self.script().reinitialize_failure = Some(error);
        self
    }

    /// All calls made so far.
    pub fn calls(&self) -> Vec<AutomationCall> {
        self.script().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.script().calls.clear();
    }

    /// Extractions attempted on `page`.
    pub fn extractions_on(&self, page: u32) -> usize {
        self.script()
            .calls
            .iter()
            .filter(|c| matches!(c, AutomationCall::Extract { page: p, .. } if *p == page))
            .count()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.script()
            .calls
            .iter()
            .filter_map(|c| match c {
                AutomationCall::Navigate { url } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }
}

fn page_from_instruction(instruction: &str) -> Option<u32> {
    let lower = instruction.to_lowercase();
    let start = lower.find("page ")? + "page ".len();
    let digits: String = lower[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[async_trait]
impl PageAutomation for ScriptedAutomation {
    async fn navigate(&self, url: &str) -> AutomationResult<()> {
        let mut script = self.script();
        script.calls.push(AutomationCall::Navigate {
            url: url.to_string(),
        });
        if let Some(error) = script.navigation_failures.pop_front() {
            return Err(error);
        }
        script.current_page = script.url_pages.get(url).copied().unwrap_or(1);
        Ok(())
    }

    async fn act(&self, instruction: &str) -> AutomationResult<()> {
        let mut script = self.script();
        script.calls.push(AutomationCall::Act {
            instruction: instruction.to_string(),
        });
        if let Some(error) = script.act_failures.pop_front() {
            return Err(error);
        }
        if let Some(page) = page_from_instruction(instruction) {
            script.current_page = page;
        }
        Ok(())
    }

    async fn observe(&self, instruction: &str) -> AutomationResult<Vec<ElementDescriptor>> {
        let mut script = self.script();
        script.calls.push(AutomationCall::Observe {
            instruction: instruction.to_string(),
        });
        Ok(std::mem::take(&mut script.overlays))
    }

    async fn extract(&self, instruction: &str, _schema: Option<&Value>) -> AutomationResult<Value> {
        let delay = self.script().extract_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script();
        let page = script.current_page.max(1);
        script.calls.push(AutomationCall::Extract {
            page,
            instruction: instruction.to_string(),
        });

        if let Some(error) = &script.extraction_failure {
            return Err(error.clone());
        }
        if let Some(next) = script
            .page_sequences
            .get_mut(&page)
            .and_then(VecDeque::pop_front)
        {
            return next;
        }
        Ok(script
            .page_payloads
            .get(&page)
            .cloned()
            .unwrap_or_else(|| json!({"products": []})))
    }

    async fn reinitialize(&self) -> AutomationResult<()> {
        let mut script = self.script();
        script.calls.push(AutomationCall::Reinitialize);
        match &script.reinitialize_failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn close(&self) -> AutomationResult<()> {
        self.script().calls.push(AutomationCall::Close);
        Ok(())
    }
}

type BuildFn = dyn Fn(&BatchJob) -> AutomationResult<ScriptedAutomation> + Send + Sync;

/// Factory handing out [`ScriptedAutomation`]s built per job.
pub struct ScriptedFactory {
    build: Box<BuildFn>,
    created: AtomicUsize,
    automations: Mutex<Vec<ScriptedAutomation>>,
}

impl ScriptedFactory {
    pub fn new(
        build: impl Fn(&BatchJob) -> AutomationResult<ScriptedAutomation> + Send + Sync + 'static,
    ) -> Self {
        Self {
            build: Box::new(build),
            created: AtomicUsize::new(0),
            automations: Mutex::new(Vec::new()),
        }
    }

    /// Every job gets a clone of `automation` (shared script and call log).
    pub fn shared(automation: ScriptedAutomation) -> Self {
        Self::new(move |_| Ok(automation.clone()))
    }

    /// Sessions created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// The automations handed out, in creation order.
    pub fn automations(&self) -> Vec<ScriptedAutomation> {
        self.automations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AutomationFactory for ScriptedFactory {
    async fn create(&self, job: &BatchJob) -> AutomationResult<Box<dyn PageAutomation>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let automation = (self.build)(job)?;
        self.automations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(automation.clone());
        Ok(Box::new(automation))
    }
}

/// A normalized product with the given name and price.
pub fn record(name: &str, amount: f64) -> ProductRecord {
    ProductRecord {
        name: name.to_string(),
        description: format!("{} description", name),
        price: Price {
            amount,
            currency: "GBP".to_string(),
        },
        image_url: format!(
            "https://cdn.example.com/{}.jpg",
            name.to_lowercase().replace(' ', "-")
        ),
        category: "Toys".to_string(),
        vendor: "shop".to_string(),
        weight: None,
        scraped_at: Utc::now(),
    }
}

/// A raw record in the shape the collaborator returns.
pub fn raw_product(name: &str, amount: f64) -> Value {
    json!({
        "name": name,
        "description": format!("{} description", name),
        "price": {"amount": amount, "currency": "GBP"},
        "image_url": format!("https://cdn.example.com/{}.jpg", name.to_lowercase().replace(' ', "-")),
    })
}

/// `count` distinct raw records named `"{prefix} {i}"`.
pub fn raw_products(prefix: &str, count: usize) -> Vec<Value> {
    (1..=count)
        .map(|i| raw_product(&format!("{} {}", prefix, i), 1.0 + i as f64))
        .collect()
}

/// An extraction payload with an optional `has_more_pages` signal.
pub fn listing_page(products: Vec<Value>, has_more_pages: Option<bool>) -> Value {
    match has_more_pages {
        Some(more) => json!({"products": products, "pagination": {"has_more_pages": more}}),
        None => json!({"products": products}),
    }
}
