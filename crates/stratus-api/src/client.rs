//! Authenticated client for the Stratus API.
//!
//! Every call signs (or reuses) a bearer token, performs one HTTP exchange
//! through the transport seam, and maps non-2xx responses onto the closed
//! failure taxonomy. Transient failures of idempotent requests are retried
//! with backoff; everything else surfaces immediately.

use crate::config::{ApiConfig, RetryConfig};
use crate::credentials::Credential;
use crate::error::ApiError;
use crate::model::{
    ApiRequest, IdempotencyKey, Method, Resource, ResourceEnvelope, ResourceKind, ResourcePage,
    TriggerParameters, WorkflowSpec,
};
use crate::retry::with_retry;
use crate::token::{TokenCache, TokenSigner};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// Raw response from a transport: status plus undecoded body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Seam between the client and the HTTP stack.
///
/// Production uses [`ReqwestTransport`]; tests script responses through
/// [`crate::testutil::ScriptedTransport`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform one exchange. Transport-level failures map to
    /// [`ApiError::Timeout`] or [`ApiError::Transient`]; HTTP status
    /// classification belongs to the client, not the transport.
    async fn execute(&self, request: &ApiRequest, bearer: &str) -> Result<HttpResponse>;
}

/// Transport over a shared `reqwest` client.
pub struct ReqwestTransport {
    base_url: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("stratus-api/{}", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Transient {
                status: None,
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(ReqwestTransport {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout_secs: config.timeout.as_secs(),
            client,
        })
    }

    /// Pagination links may be absolute; everything else is relative to
    /// the configured base URL.
    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &ApiRequest, bearer: &str) -> Result<HttpResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = self
            .client
            .request(method, self.url_for(&request.path))
            .bearer_auth(bearer);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(key) = &request.idempotency_key {
            builder = builder.header("X-Idempotency-Key", key);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout {
                    seconds: self.timeout_secs,
                }
            } else {
                ApiError::Transient {
                    status: None,
                    message: format!("network error: {e}"),
                }
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| ApiError::Transient {
            status: Some(status),
            message: format!("failed to read response body: {e}"),
        })?;

        Ok(HttpResponse { status, body })
    }
}

/// Typed API client, one request in flight at a time.
///
/// Owns its token cache instead of sharing global state, so independent
/// clients (and tests) never contend.
pub struct ApiClient<T: HttpTransport> {
    transport: T,
    signer: TokenSigner,
    tokens: TokenCache,
    retry: RetryConfig,
}

impl ApiClient<ReqwestTransport> {
    /// Client over the live API from a resolved credential.
    pub fn connect(config: &ApiConfig, credential: &Credential) -> Result<Self> {
        let transport = ReqwestTransport::new(config)?;
        let signer = TokenSigner::new(credential)?;
        Ok(ApiClient::new(transport, signer, config.retry.clone()))
    }
}

impl<T: HttpTransport> ApiClient<T> {
    pub fn new(transport: T, signer: TokenSigner, retry: RetryConfig) -> Self {
        ApiClient {
            transport,
            signer,
            tokens: TokenCache::new(),
            retry,
        }
    }

    /// List resources of `kind`, following pagination until exhausted or
    /// `limit` entries are collected.
    pub async fn list_resources(&self, kind: ResourceKind, limit: usize) -> Result<Vec<Resource>> {
        let mut collected = Vec::new();
        let mut request = ApiRequest::list(kind, limit);

        loop {
            let response = self.send(&request).await?;
            let page: ResourcePage = decode(&response.body)?;
            collected.extend(page.data);

            match page.links.next {
                Some(next) if collected.len() < limit => request = ApiRequest::follow(&next),
                _ => break,
            }
        }

        collected.truncate(limit);
        Ok(collected)
    }

    /// Register a workflow definition.
    ///
    /// Eligible for retry: the idempotency key lets the API deduplicate a
    /// resend after a transient failure.
    pub async fn create_resource(
        &self,
        spec: &WorkflowSpec,
        key: &IdempotencyKey,
    ) -> Result<Resource> {
        let request = ApiRequest::create_workflow(spec, key);
        let response = self.send(&request).await?;
        decode::<ResourceEnvelope>(&response.body).map(|envelope| envelope.data)
    }

    /// Start a build run for a workflow. Never retried: a resend could
    /// start a second run.
    pub async fn trigger_action(
        &self,
        workflow_id: &str,
        parameters: &TriggerParameters,
    ) -> Result<Resource> {
        let request = ApiRequest::trigger_build(workflow_id, parameters);
        let response = self.send(&request).await?;
        decode::<ResourceEnvelope>(&response.body).map(|envelope| envelope.data)
    }

    /// Poll one build run.
    pub async fn get_status(&self, build_id: &str) -> Result<Resource> {
        let request = ApiRequest::build_status(build_id);
        let response = self.send(&request).await?;
        decode::<ResourceEnvelope>(&response.body).map(|envelope| envelope.data)
    }

    /// Send with token attachment, status classification, and, for
    /// idempotent requests, transient-failure retry.
    async fn send(&self, request: &ApiRequest) -> Result<HttpResponse> {
        let idempotent = request.method == Method::Get || request.idempotency_key.is_some();

        if idempotent {
            with_retry(&self.retry, &request.path, || self.attempt(request)).await
        } else {
            self.attempt(request).await
        }
    }

    async fn attempt(&self, request: &ApiRequest) -> Result<HttpResponse> {
        let bearer = self.tokens.bearer(&self.signer)?;
        let response = self.transport.execute(request, &bearer).await?;

        if (200..300).contains(&response.status) {
            return Ok(response);
        }
        Err(classify(response.status, &response.body, &request.path))
    }
}

/// Map a non-2xx response onto the failure taxonomy.
fn classify(status: u16, body: &str, path: &str) -> ApiError {
    let message = error_detail(body);
    match status {
        401 | 403 => ApiError::AuthorizationFailure { status, message },
        404 => ApiError::NotFound(path.to_string()),
        429 => ApiError::Transient {
            status: Some(status),
            message,
        },
        s if s >= 500 => ApiError::Transient {
            status: Some(s),
            message,
        },
        s => ApiError::RequestInvalid { status: s, message },
    }
}

/// Best-effort human detail from a vendor error body.
fn error_detail(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        errors: Vec<ErrorEntry>,
    }
    #[derive(Deserialize)]
    struct ErrorEntry {
        #[serde(default)]
        detail: Option<String>,
        #[serde(default)]
        title: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(detail) = parsed
            .errors
            .into_iter()
            .next()
            .and_then(|entry| entry.detail.or(entry.title))
        {
            return detail;
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no error detail in response".to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

fn decode<D: serde::de::DeserializeOwned>(body: &str) -> Result<D> {
    serde_json::from_str(body).map_err(|e| ApiError::Transient {
        status: None,
        message: format!("invalid response body: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_credential, ScriptedTransport};
    use serde_json::json;

    fn client(transport: &ScriptedTransport) -> ApiClient<ScriptedTransport> {
        let signer = TokenSigner::new(&test_credential()).expect("signer");
        ApiClient::new(transport.clone(), signer, RetryConfig::immediate(3))
    }

    fn build_body(id: &str, status: &str) -> String {
        json!({ "data": { "id": id, "type": "builds", "attributes": { "status": status } } })
            .to_string()
    }

    #[tokio::test]
    async fn test_transient_failures_retried_until_success() {
        let transport = ScriptedTransport::new()
            .respond(500, "{}")
            .respond(500, "{}")
            .respond(200, &build_body("b-1", "running"));

        let resource = client(&transport)
            .get_status("b-1")
            .await
            .expect("succeeds after two retries");

        assert_eq!(resource.id, "b-1");
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_transient_exhaustion_surfaces_after_all_attempts() {
        let transport = ScriptedTransport::new()
            .respond(503, "{}")
            .respond(503, "{}")
            .respond(503, "{}");

        let result = client(&transport).get_status("b-1").await;

        assert!(matches!(result, Err(ApiError::Transient { .. })));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let transport = ScriptedTransport::new()
            .respond(429, "{}")
            .respond(200, &build_body("b-1", "running"));

        client(&transport).get_status("b-1").await.expect("retried");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let transport = ScriptedTransport::new().respond(404, "{}");

        let result = client(&transport).get_status("b-404").await;

        assert!(matches!(result, Err(ApiError::NotFound(path)) if path == "/builds/b-404"));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_authorization_failure_is_not_retried() {
        let transport = ScriptedTransport::new()
            .respond(401, r#"{"errors":[{"detail":"token expired"}]}"#);

        let result = client(&transport).get_status("b-1").await;

        match result {
            Err(ApiError::AuthorizationFailure { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "token expired");
            }
            other => panic!("expected AuthorizationFailure, got {other:?}"),
        }
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_other_4xx_is_request_invalid() {
        let transport = ScriptedTransport::new().respond(422, r#"{"errors":[{"title":"bad spec"}]}"#);

        let result = client(&transport).get_status("b-1").await;

        assert!(matches!(
            result,
            Err(ApiError::RequestInvalid { status: 422, .. })
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_trigger_is_never_retried() {
        let transport = ScriptedTransport::new().respond(500, "{}");

        let result = client(&transport)
            .trigger_action("wf-1", &TriggerParameters::default())
            .await;

        assert!(matches!(result, Err(ApiError::Transient { .. })));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_create_retries_with_same_idempotency_key() {
        let spec = WorkflowSpec {
            name: "Nightly".to_string(),
            trigger: crate::model::TriggerType::Branch,
            branch_pattern: Some("main".to_string()),
            tag_pattern: None,
            scheme: "App".to_string(),
            actions: vec!["build".to_string()],
            extra: serde_json::Map::new(),
        };
        let key = IdempotencyKey::new("create-key-1");
        let transport = ScriptedTransport::new().respond(502, "{}").respond(
            201,
            &json!({ "data": { "id": "wf-1", "type": "workflows", "attributes": {} } }).to_string(),
        );

        let resource = client(&transport)
            .create_resource(&spec, &key)
            .await
            .expect("create succeeds on retry");

        assert_eq!(resource.id, "wf-1");
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
        assert_eq!(requests[0].idempotency_key.as_deref(), Some("create-key-1"));
    }

    #[tokio::test]
    async fn test_timeout_from_transport_is_retried() {
        let transport = ScriptedTransport::new()
            .fail(ApiError::Timeout { seconds: 30 })
            .respond(200, &build_body("b-1", "succeeded"));

        let resource = client(&transport).get_status("b-1").await.expect("retried");

        assert_eq!(resource.status(), Some(crate::model::BuildStatus::Succeeded));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_list_follows_pagination() {
        let page1 = json!({
            "data": [{ "id": "wf-1", "type": "workflows", "attributes": {} }],
            "links": { "next": "/workflows?cursor=abc" }
        });
        let page2 = json!({
            "data": [{ "id": "wf-2", "type": "workflows", "attributes": {} }]
        });
        let transport = ScriptedTransport::new()
            .respond(200, &page1.to_string())
            .respond(200, &page2.to_string());

        let resources = client(&transport)
            .list_resources(ResourceKind::Workflows, 10)
            .await
            .expect("list");

        assert_eq!(resources.len(), 2);
        assert_eq!(resources[1].id, "wf-2");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].path, "/workflows?cursor=abc");
    }

    #[tokio::test]
    async fn test_list_stops_at_limit() {
        let page = json!({
            "data": [
                { "id": "wf-1", "type": "workflows", "attributes": {} },
                { "id": "wf-2", "type": "workflows", "attributes": {} }
            ],
            "links": { "next": "/workflows?cursor=more" }
        });
        let transport = ScriptedTransport::new().respond(200, &page.to_string());

        let resources = client(&transport)
            .list_resources(ResourceKind::Workflows, 2)
            .await
            .expect("list");

        assert_eq!(resources.len(), 2);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_success_body_is_transient() {
        let transport = ScriptedTransport::new().respond(200, "not json");

        let result = client(&transport).get_status("b-1").await;

        assert!(matches!(result, Err(ApiError::Transient { status: None, .. })));
    }

    #[test]
    fn test_error_detail_prefers_vendor_detail() {
        assert_eq!(
            error_detail(r#"{"errors":[{"detail":"rate limited"}]}"#),
            "rate limited"
        );
        assert_eq!(
            error_detail(r#"{"errors":[{"title":"Bad Request"}]}"#),
            "Bad Request"
        );
        assert_eq!(error_detail(""), "no error detail in response");
        assert_eq!(error_detail("plain text"), "plain text");
    }
}
