//! Pure REST client for a remote page-automation service.
//!
//! The service drives a real browser and exposes natural-language page
//! operations per session. This crate only speaks HTTP; mapping its errors
//! onto a scraping workflow is the caller's concern.
//!
//! # Example
//!
//! ```rust,ignore
//! use automation_client::{AutomationClient, SessionOptions};
//!
//! let client = AutomationClient::new("http://localhost:3000").with_api_key(key);
//!
//! let session = client.create_session(&SessionOptions::default()).await?;
//! client.navigate(&session.session_id, "https://groceries.example/fruit").await?;
//! let overlays = client.observe(&session.session_id, "Find cookie banners").await?;
//! let data = client.extract(&session.session_id, "Extract all products", None).await?;
//! client.close_session(&session.session_id).await?;
//! ```
//!
//! # Endpoints
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | POST | `/sessions` | [`SessionOptions`] |
//! | POST | `/sessions/{id}/navigate` | `{url}` |
//! | POST | `/sessions/{id}/act` | `{instruction}` |
//! | POST | `/sessions/{id}/observe` | `{instruction}` |
//! | POST | `/sessions/{id}/extract` | `{instruction, schema?}` |
//! | DELETE | `/sessions/{id}` | |

pub mod error;
pub mod types;

pub use error::{AutomationClientError, Result};
pub use types::{Element, SessionInfo, SessionOptions};

use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use types::{ApiResponse, ExtractRequest, InstructionRequest, NavigateRequest};

#[derive(Clone)]
pub struct AutomationClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl AutomationClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Use a preconfigured HTTP client (timeouts, proxies).
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Open a browser session.
    pub async fn create_session(&self, options: &SessionOptions) -> Result<SessionInfo> {
        let endpoint = "/sessions";
        let session: SessionInfo = self
            .send(endpoint, self.client.post(self.url(endpoint)).json(options))
            .await?
            .ok_or_else(|| missing(endpoint))?;
        debug!(session_id = %session.session_id, "automation session created");
        Ok(session)
    }

    pub async fn navigate(&self, session_id: &str, url: &str) -> Result<()> {
        let endpoint = format!("/sessions/{}/navigate", session_id);
        self.send::<Value>(
            &endpoint,
            self.client
                .post(self.url(&endpoint))
                .json(&NavigateRequest { url }),
        )
        .await?;
        Ok(())
    }

    /// Perform a natural-language action ("click the next button").
    pub async fn act(&self, session_id: &str, instruction: &str) -> Result<()> {
        let endpoint = format!("/sessions/{}/act", session_id);
        self.send::<Value>(
            &endpoint,
            self.client
                .post(self.url(&endpoint))
                .json(&InstructionRequest { instruction }),
        )
        .await?;
        Ok(())
    }

    /// Elements matching a natural-language description. No data means none.
    pub async fn observe(&self, session_id: &str, instruction: &str) -> Result<Vec<Element>> {
        let endpoint = format!("/sessions/{}/observe", session_id);
        let elements = self
            .send(
                &endpoint,
                self.client
                    .post(self.url(&endpoint))
                    .json(&InstructionRequest { instruction }),
            )
            .await?;
        Ok(elements.unwrap_or_default())
    }

    /// Structured data extracted from the current page, shaped by `schema`
    /// when one is given.
    pub async fn extract(
        &self,
        session_id: &str,
        instruction: &str,
        schema: Option<&Value>,
    ) -> Result<Value> {
        let endpoint = format!("/sessions/{}/extract", session_id);
        self.send(
            &endpoint,
            self.client
                .post(self.url(&endpoint))
                .json(&ExtractRequest {
                    instruction,
                    schema,
                }),
        )
        .await?
        .ok_or_else(|| missing(&endpoint))
    }

    pub async fn close_session(&self, session_id: &str) -> Result<()> {
        let endpoint = format!("/sessions/{}", session_id);
        self.send::<Value>(&endpoint, self.client.delete(self.url(&endpoint)))
            .await?;
        debug!(session_id, "automation session closed");
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and unwrap the `{success, data, error}` envelope.
    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<Option<T>> {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };

        let resp = request.send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiResponse<Value>>(&body)
                .ok()
                .and_then(|envelope| envelope.error)
                .unwrap_or(body);
            warn!(endpoint, status = status.as_u16(), error = %message, "automation API error");
            return Err(AutomationClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        if body.trim().is_empty() {
            return Ok(None);
        }

        let envelope: ApiResponse<T> =
            serde_json::from_str(&body).map_err(|source| AutomationClientError::Json {
                endpoint: endpoint.to_string(),
                source,
            })?;
        if !envelope.success {
            let message = envelope
                .error
                .unwrap_or_else(|| "request failed".to_string());
            warn!(endpoint, error = %message, "automation request unsuccessful");
            return Err(AutomationClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(envelope.data)
    }
}

fn missing(endpoint: &str) -> AutomationClientError {
    AutomationClientError::MissingData {
        endpoint: endpoint.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_session_sends_key_and_options() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/sessions")
            .match_header("authorization", "Bearer secret")
            .match_body(Matcher::Json(json!({"headless": true})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "data": {"session_id": "abc"}}"#)
            .create_async()
            .await;

        let client = AutomationClient::new(server.url()).with_api_key("secret");
        let session = client
            .create_session(&SessionOptions::default())
            .await
            .unwrap();

        assert_eq!(session.session_id, "abc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_navigate_and_act_bodies() {
        let mut server = mockito::Server::new_async().await;
        let navigate = server
            .mock("POST", "/sessions/abc/navigate")
            .match_body(Matcher::Json(json!({"url": "https://shop.example"})))
            .with_status(200)
            .with_body(r#"{"success": true, "data": null}"#)
            .create_async()
            .await;
        let act = server
            .mock("POST", "/sessions/abc/act")
            .match_body(Matcher::Json(json!({"instruction": "Go to page 2"})))
            .with_status(200)
            .with_body(r#"{"success": true}"#)
            .create_async()
            .await;

        let client = AutomationClient::new(server.url());
        client.navigate("abc", "https://shop.example").await.unwrap();
        client.act("abc", "Go to page 2").await.unwrap();

        navigate.assert_async().await;
        act.assert_async().await;
    }

    #[tokio::test]
    async fn test_observe_parses_elements() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/sessions/abc/observe")
            .with_status(200)
            .with_body(
                r##"{"success": true, "data": [
                    {"description": "cookie banner", "selector": "#cookies"},
                    {"description": "newsletter popup"}
                ]}"##,
            )
            .create_async()
            .await;

        let client = AutomationClient::new(server.url());
        let elements = client.observe("abc", "Find overlays").await.unwrap();

        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].selector.as_deref(), Some("#cookies"));
        assert_eq!(elements[1].description, "newsletter popup");
    }

    #[tokio::test]
    async fn test_extract_passes_schema() {
        let mut server = mockito::Server::new_async().await;
        let schema = json!({"type": "object"});
        let _mock = server
            .mock("POST", "/sessions/abc/extract")
            .match_body(Matcher::Json(json!({
                "instruction": "Extract products",
                "schema": {"type": "object"}
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "data": {"products": []}}"#)
            .create_async()
            .await;

        let client = AutomationClient::new(server.url());
        let data = client
            .extract("abc", "Extract products", Some(&schema))
            .await
            .unwrap();
        assert_eq!(data, json!({"products": []}));
    }

    #[tokio::test]
    async fn test_unsuccessful_envelope_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/sessions/abc/act")
            .with_status(200)
            .with_body(r#"{"success": false, "error": "element not found"}"#)
            .create_async()
            .await;

        let client = AutomationClient::new(server.url());
        let err = client.act("abc", "Click next").await.unwrap_err();
        match err {
            AutomationClientError::Api { status, message } => {
                assert_eq!(status, 200);
                assert_eq!(message, "element not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_success_status_uses_envelope_message() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/sessions/gone/navigate")
            .with_status(404)
            .with_body(r#"{"success": false, "error": "session not found"}"#)
            .create_async()
            .await;

        let client = AutomationClient::new(format!("{}/", server.url()));
        let err = client.navigate("gone", "https://x.example").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("session not found"));
    }

    #[tokio::test]
    async fn test_close_session_accepts_empty_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/sessions/abc")
            .with_status(204)
            .create_async()
            .await;

        let client = AutomationClient::new(server.url());
        client.close_session("abc").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_extract_without_data_is_missing() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/sessions/abc/extract")
            .with_status(200)
            .with_body(r#"{"success": true}"#)
            .create_async()
            .await;

        let client = AutomationClient::new(server.url());
        let err = client.extract("abc", "Extract", None).await.unwrap_err();
        assert!(matches!(err, AutomationClientError::MissingData { .. }));
    }
}
