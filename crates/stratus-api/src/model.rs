//! Wire-level data model for the Stratus API.
//!
//! Workflow payloads are transported, not interpreted: beyond resource
//! identifiers and status enumerations, vendor fields round-trip through
//! the flattened `extra` maps untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Resource collections exposed by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Products,
    Workflows,
    Builds,
}

impl ResourceKind {
    /// URL path segment of the collection.
    pub fn path_segment(&self) -> &'static str {
        match self {
            ResourceKind::Products => "products",
            ResourceKind::Workflows => "workflows",
            ResourceKind::Builds => "builds",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path_segment())
    }
}

/// HTTP method of an API request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// Caller-supplied or generated token letting the API deduplicate a
/// retried create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        IdempotencyKey(Uuid::new_v4().to_string())
    }

    /// Wrap a caller-supplied key.
    pub fn new(value: impl Into<String>) -> Self {
        IdempotencyKey(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable API request, fully determined before any network activity.
///
/// Dry-run mode renders exactly this value; the live path sends it
/// unchanged, so what an audit shows is what the API receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl ApiRequest {
    /// List a resource collection page.
    pub fn list(kind: ResourceKind, limit: usize) -> Self {
        ApiRequest {
            method: Method::Get,
            path: format!("/{}", kind.path_segment()),
            query: vec![("limit".to_string(), limit.to_string())],
            body: None,
            idempotency_key: None,
        }
    }

    /// Follow a pagination link from a previous page.
    pub fn follow(next: &str) -> Self {
        ApiRequest {
            method: Method::Get,
            path: next.to_string(),
            query: Vec::new(),
            body: None,
            idempotency_key: None,
        }
    }

    /// Register a workflow definition.
    ///
    /// Carries the idempotency key so a resend after a transient failure
    /// cannot create a duplicate workflow.
    pub fn create_workflow(spec: &WorkflowSpec, key: &IdempotencyKey) -> Self {
        ApiRequest {
            method: Method::Post,
            path: "/workflows".to_string(),
            query: Vec::new(),
            body: Some(serde_json::json!({
                "data": { "type": "workflows", "attributes": spec }
            })),
            idempotency_key: Some(key.to_string()),
        }
    }

    /// Start a build run for a workflow. No idempotency key: a resend
    /// could start a second run, so this request is never retried.
    pub fn trigger_build(workflow_id: &str, parameters: &TriggerParameters) -> Self {
        ApiRequest {
            method: Method::Post,
            path: format!("/workflows/{workflow_id}/builds"),
            query: Vec::new(),
            body: Some(serde_json::json!({
                "data": { "type": "builds", "attributes": parameters }
            })),
            idempotency_key: None,
        }
    }

    /// Poll one build run.
    pub fn build_status(build_id: &str) -> Self {
        ApiRequest {
            method: Method::Get,
            path: format!("/builds/{build_id}"),
            query: Vec::new(),
            body: None,
            idempotency_key: None,
        }
    }
}

/// What starts a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerType {
    Branch,
    Tag,
    PullRequest,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerType::Branch => write!(f, "branch"),
            TriggerType::Tag => write!(f, "tag"),
            TriggerType::PullRequest => write!(f, "pull-request"),
        }
    }
}

/// Build-automation workflow definition, transported opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Workflow name
    pub name: String,
    /// What starts the workflow
    pub trigger: TriggerType,
    /// Branch pattern for branch triggers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_pattern: Option<String>,
    /// Tag pattern for tag triggers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_pattern: Option<String>,
    /// Build scheme
    pub scheme: String,
    /// Ordered action steps (build, test, archive, ...)
    pub actions: Vec<String>,
    /// Vendor fields this client does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parameters for starting a build run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Vendor fields passed through unchanged
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Build run states the client knows how to display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    /// A state this client version does not know
    Other(String),
}

impl BuildStatus {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "pending" => BuildStatus::Pending,
            "running" => BuildStatus::Running,
            "succeeded" => BuildStatus::Succeeded,
            "failed" => BuildStatus::Failed,
            "canceled" => BuildStatus::Canceled,
            _ => BuildStatus::Other(value.to_string()),
        }
    }

    /// Whether the run has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Succeeded | BuildStatus::Failed | BuildStatus::Canceled
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Pending => write!(f, "pending"),
            BuildStatus::Running => write!(f, "running"),
            BuildStatus::Succeeded => write!(f, "succeeded"),
            BuildStatus::Failed => write!(f, "failed"),
            BuildStatus::Canceled => write!(f, "canceled"),
            BuildStatus::Other(value) => write!(f, "{value}"),
        }
    }
}

/// A single resource from an API response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Resource {
    /// The status attribute, when the resource carries one.
    pub fn status(&self) -> Option<BuildStatus> {
        self.attributes
            .get("status")
            .and_then(Value::as_str)
            .map(BuildStatus::parse)
    }

    /// A string attribute for display, `"-"` when absent.
    pub fn attribute_str(&self, name: &str) -> &str {
        self.attributes
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or("-")
    }
}

/// One page of a list response.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourcePage {
    pub data: Vec<Resource>,
    #[serde(default)]
    pub links: PageLinks,
}

/// Pagination links attached to a list page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageLinks {
    #[serde(default)]
    pub next: Option<String>,
}

/// Single-resource response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceEnvelope {
    pub data: Resource,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_with_extra() -> WorkflowSpec {
        let mut extra = Map::new();
        extra.insert("ciProduct".to_string(), json!({ "id": "prod-1" }));
        WorkflowSpec {
            name: "Nightly".to_string(),
            trigger: TriggerType::Branch,
            branch_pattern: Some("release/*".to_string()),
            tag_pattern: None,
            scheme: "App".to_string(),
            actions: vec!["build".to_string(), "test".to_string()],
            extra,
        }
    }

    #[test]
    fn test_workflow_spec_roundtrip_preserves_unknown_fields() {
        let spec = spec_with_extra();
        let value = serde_json::to_value(&spec).expect("serialize");
        let back: WorkflowSpec = serde_json::from_value(value).expect("deserialize");

        assert_eq!(back, spec);
        assert_eq!(back.extra["ciProduct"]["id"], "prod-1");
    }

    #[test]
    fn test_trigger_type_wire_names() {
        assert_eq!(
            serde_json::to_value(TriggerType::PullRequest).expect("serialize"),
            json!("pull-request")
        );
        assert_eq!(
            serde_json::to_value(TriggerType::Branch).expect("serialize"),
            json!("branch")
        );
    }

    #[test]
    fn test_list_request_carries_limit() {
        let request = ApiRequest::list(ResourceKind::Workflows, 25);
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.path, "/workflows");
        assert_eq!(
            request.query,
            vec![("limit".to_string(), "25".to_string())]
        );
        assert!(request.body.is_none());
    }

    #[test]
    fn test_create_request_embeds_spec_and_key() {
        let spec = spec_with_extra();
        let key = IdempotencyKey::new("fixed-key");
        let request = ApiRequest::create_workflow(&spec, &key);

        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, "/workflows");
        assert_eq!(request.idempotency_key.as_deref(), Some("fixed-key"));

        let body = request.body.expect("body");
        assert_eq!(body["data"]["type"], "workflows");
        assert_eq!(body["data"]["attributes"]["name"], "Nightly");
    }

    #[test]
    fn test_trigger_request_has_no_idempotency_key() {
        let request = ApiRequest::trigger_build("wf-9", &TriggerParameters::default());
        assert_eq!(request.path, "/workflows/wf-9/builds");
        assert!(request.idempotency_key.is_none());
    }

    #[test]
    fn test_idempotency_keys_are_unique() {
        assert_ne!(IdempotencyKey::generate(), IdempotencyKey::generate());
    }

    #[test]
    fn test_build_status_parse() {
        assert_eq!(BuildStatus::parse("RUNNING"), BuildStatus::Running);
        assert_eq!(BuildStatus::parse("succeeded"), BuildStatus::Succeeded);
        assert_eq!(
            BuildStatus::parse("provisioning"),
            BuildStatus::Other("provisioning".to_string())
        );
        assert!(BuildStatus::Failed.is_terminal());
        assert!(!BuildStatus::Running.is_terminal());
    }

    #[test]
    fn test_resource_status_accessor() {
        let resource: Resource = serde_json::from_value(json!({
            "id": "b-1",
            "type": "builds",
            "attributes": { "status": "running", "number": 42 }
        }))
        .expect("resource");

        assert_eq!(resource.status(), Some(BuildStatus::Running));
        assert_eq!(resource.attribute_str("missing"), "-");
    }
}
