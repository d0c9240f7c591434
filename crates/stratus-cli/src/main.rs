//! Stratus - command-line interface for the Stratus cloud build API
//!
//! The `stratus` command wraps the vendor build-automation REST API with
//! signed-request authentication.
//!
//! ## Commands
//!
//! - `list`: list products, workflows, or build runs
//! - `create`: register a workflow definition
//! - `trigger`: start a build run for a workflow
//! - `status`: poll one build run
//! - `auth`: manage credentials in the OS credential store

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use stratus_api::credentials::KEYRING_ACCOUNT;
use stratus_api::{
    ApiClient, ApiConfig, ApiError, ApiRequest, CredentialResolver, IdempotencyKey, KeyringStore,
    ReqwestTransport, Resource, ResourceKind, SecretStore, StoredCredential, TriggerParameters,
    TriggerType, WorkflowSpec,
};
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "stratus")]
#[command(author = "Stratus Tools")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Signed-request CLI for the Stratus cloud build API", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    /// API base URL override
    #[arg(long, global = true, env = "STRATUS_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List resources of a kind
    List {
        /// Resource collection to list
        #[arg(value_enum)]
        kind: KindArg,

        /// Maximum entries to fetch across pages
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Register a workflow definition
    Create {
        /// Workflow name
        #[arg(long, required_unless_present = "spec")]
        name: Option<String>,

        /// Build scheme
        #[arg(long, required_unless_present = "spec")]
        scheme: Option<String>,

        /// What starts the workflow
        #[arg(long, value_enum, required_unless_present = "spec")]
        trigger: Option<TriggerArg>,

        /// Branch pattern for branch triggers
        #[arg(long)]
        branch_pattern: Option<String>,

        /// Tag pattern for tag triggers
        #[arg(long)]
        tag_pattern: Option<String>,

        /// Ordered action step (repeat for multiple steps)
        #[arg(long = "action")]
        actions: Vec<String>,

        /// Read the full workflow spec from a JSON file instead of flags
        #[arg(long)]
        spec: Option<PathBuf>,

        /// Idempotency key for safe retries (generated when omitted)
        #[arg(long)]
        idempotency_key: Option<String>,

        /// Print the request without sending it
        #[arg(long)]
        dry_run: bool,
    },

    /// Start a build run for a workflow
    Trigger {
        /// Workflow identifier
        workflow_id: String,

        /// Branch to build
        #[arg(long)]
        branch: Option<String>,

        /// Tag to build
        #[arg(long)]
        tag: Option<String>,

        /// Print the request without sending it
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the status of a build run
    Status {
        /// Build run identifier
        build_id: String,
    },

    /// Manage credentials in the OS credential store
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
}

#[derive(Subcommand)]
enum AuthAction {
    /// Validate a credential and store it
    Set {
        /// API key identifier
        #[arg(long)]
        key_id: String,

        /// Issuer identifier (UUID)
        #[arg(long)]
        issuer_id: String,

        /// Path to the PEM-encoded P-256 private key
        #[arg(long)]
        key_path: PathBuf,
    },

    /// Report which source credential resolution would use
    Check,

    /// Remove the stored credential
    Clear,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Products,
    Workflows,
    Builds,
}

impl From<KindArg> for ResourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Products => ResourceKind::Products,
            KindArg::Workflows => ResourceKind::Workflows,
            KindArg::Builds => ResourceKind::Builds,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TriggerArg {
    Branch,
    Tag,
    PullRequest,
}

impl From<TriggerArg> for TriggerType {
    fn from(trigger: TriggerArg) -> Self {
        match trigger {
            TriggerArg::Branch => TriggerType::Branch,
            TriggerArg::Tag => TriggerType::Tag,
            TriggerArg::PullRequest => TriggerType::PullRequest,
        }
    }
}

/// CLI failure: either a typed API failure or local context (file I/O,
/// rendering).
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Api(#[from] ApiError),

    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

impl CliError {
    fn kind(&self) -> &'static str {
        match self {
            CliError::Api(err) => err.kind(),
            CliError::Other(_) => "error",
        }
    }

    fn exit_code(&self) -> u8 {
        match self {
            CliError::Api(err) => err.exit_code(),
            CliError::Other(_) => 1,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    stratus_api::telemetry::init_tracing(cli.json, level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}: {}", err.kind(), err);
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = match cli.api_url.as_deref() {
        Some(url) => ApiConfig::new(url),
        None => ApiConfig::from_env(),
    };

    match cli.command {
        Commands::List { kind, limit } => cmd_list(&config, kind.into(), limit, cli.json).await,
        Commands::Create {
            name,
            scheme,
            trigger,
            branch_pattern,
            tag_pattern,
            actions,
            spec,
            idempotency_key,
            dry_run,
        } => {
            let spec = load_workflow_spec(
                spec.as_deref(),
                name,
                scheme,
                trigger,
                branch_pattern,
                tag_pattern,
                actions,
            )?;
            let key = idempotency_key
                .map(IdempotencyKey::new)
                .unwrap_or_else(IdempotencyKey::generate);
            cmd_create(&config, &spec, &key, dry_run, cli.json).await
        }
        Commands::Trigger {
            workflow_id,
            branch,
            tag,
            dry_run,
        } => {
            let parameters = TriggerParameters {
                branch,
                tag,
                ..TriggerParameters::default()
            };
            cmd_trigger(&config, &workflow_id, &parameters, dry_run, cli.json).await
        }
        Commands::Status { build_id } => cmd_status(&config, &build_id, cli.json).await,
        Commands::Auth { action } => match action {
            AuthAction::Set {
                key_id,
                issuer_id,
                key_path,
            } => cmd_auth_set(&key_id, &issuer_id, &key_path),
            AuthAction::Check => cmd_auth_check(cli.json),
            AuthAction::Clear => cmd_auth_clear(),
        },
    }
}

/// Build a workflow spec from a JSON file or from flags.
fn load_workflow_spec(
    path: Option<&Path>,
    name: Option<String>,
    scheme: Option<String>,
    trigger: Option<TriggerArg>,
    branch_pattern: Option<String>,
    tag_pattern: Option<String>,
    actions: Vec<String>,
) -> Result<WorkflowSpec, CliError> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read workflow spec {path:?}"))?;
        let spec: WorkflowSpec = serde_json::from_str(&content)
            .with_context(|| format!("workflow spec {path:?} is not valid JSON"))?;
        return Ok(spec);
    }

    // clap enforces presence of these when --spec is absent
    let name = name.ok_or_else(|| anyhow::anyhow!("--name is required without --spec"))?;
    let scheme = scheme.ok_or_else(|| anyhow::anyhow!("--scheme is required without --spec"))?;
    let trigger = trigger.ok_or_else(|| anyhow::anyhow!("--trigger is required without --spec"))?;

    if actions.is_empty() {
        return Err(anyhow::anyhow!("at least one --action is required without --spec").into());
    }

    Ok(WorkflowSpec {
        name,
        trigger: trigger.into(),
        branch_pattern,
        tag_pattern,
        scheme,
        actions,
        extra: serde_json::Map::new(),
    })
}

/// Resolve credentials and open an authenticated client.
fn connect(config: &ApiConfig) -> Result<ApiClient<ReqwestTransport>, CliError> {
    let resolver = CredentialResolver::system();
    let (credential, source) = resolver.resolve_with_source()?;
    debug!(key_id = %credential.key_id, %source, "resolved API credential");
    Ok(ApiClient::connect(config, &credential)?)
}

/// List resources of a kind
async fn cmd_list(
    config: &ApiConfig,
    kind: ResourceKind,
    limit: usize,
    json: bool,
) -> Result<(), CliError> {
    let client = connect(config)?;
    let resources = client.list_resources(kind, limit).await?;

    if json {
        println!("{}", render_json(&resources)?);
        return Ok(());
    }

    if resources.is_empty() {
        println!("No {} found.", kind);
        return Ok(());
    }

    for resource in &resources {
        println!("{}", render_resource_line(resource));
    }
    println!("{} {} listed", resources.len(), kind);

    Ok(())
}

/// Register a workflow definition
async fn cmd_create(
    config: &ApiConfig,
    spec: &WorkflowSpec,
    key: &IdempotencyKey,
    dry_run: bool,
    json: bool,
) -> Result<(), CliError> {
    let request = ApiRequest::create_workflow(spec, key);
    if dry_run {
        return render_dry_run(&request, json);
    }

    let client = connect(config)?;
    let resource = client.create_resource(spec, key).await?;

    if json {
        println!("{}", render_json(&resource)?);
        return Ok(());
    }

    println!("Created workflow '{}' ({})", spec.name, resource.id);
    println!("Idempotency key: {}", key);

    Ok(())
}

/// Start a build run for a workflow
async fn cmd_trigger(
    config: &ApiConfig,
    workflow_id: &str,
    parameters: &TriggerParameters,
    dry_run: bool,
    json: bool,
) -> Result<(), CliError> {
    let request = ApiRequest::trigger_build(workflow_id, parameters);
    if dry_run {
        return render_dry_run(&request, json);
    }

    let client = connect(config)?;
    let resource = client.trigger_action(workflow_id, parameters).await?;

    if json {
        println!("{}", render_json(&resource)?);
        return Ok(());
    }

    println!("Started build {} for workflow {}", resource.id, workflow_id);
    if let Some(status) = resource.status() {
        println!("Status: {}", status);
    }

    Ok(())
}

/// Show the status of a build run
async fn cmd_status(config: &ApiConfig, build_id: &str, json: bool) -> Result<(), CliError> {
    let client = connect(config)?;
    let resource = client.get_status(build_id).await?;

    if json {
        println!("{}", render_json(&resource)?);
        return Ok(());
    }

    println!("Build:  {}", resource.id);
    match resource.status() {
        Some(status) => println!("Status: {}", status),
        None => println!("Status: -"),
    }
    for field in ["number", "startedAt", "finishedAt"] {
        let value = resource.attribute_str(field);
        if value != "-" {
            println!("{:<7} {}", format!("{field}:"), value);
        }
    }

    Ok(())
}

/// Validate a credential and store it in the OS credential store
fn cmd_auth_set(key_id: &str, issuer_id: &str, key_path: &Path) -> Result<(), CliError> {
    let pem = std::fs::read_to_string(key_path)
        .with_context(|| format!("failed to read private key {key_path:?}"))?;

    let record = StoredCredential {
        key_id: key_id.to_string(),
        issuer_id: issuer_id.to_string(),
        private_key_pem: pem,
    };
    // Reject unusable material before it reaches the store.
    record.clone().into_credential()?;

    let serialized = serde_json::to_string(&record).context("serialize credential record")?;
    KeyringStore::default().put(KEYRING_ACCOUNT, &serialized)?;

    println!("Stored credential for key {} in the OS credential store.", key_id);
    Ok(())
}

/// Report which source credential resolution would use
fn cmd_auth_check(json: bool) -> Result<(), CliError> {
    let resolver = CredentialResolver::system();
    let (credential, source) = resolver.resolve_with_source()?;

    if json {
        let report = json!({
            "source": source.to_string(),
            "key_id": credential.key_id,
            "issuer_id": credential.issuer_id.to_string(),
        });
        println!("{}", render_json(&report)?);
        return Ok(());
    }

    println!("Credential resolved from {}", source);
    println!("Key ID:    {}", credential.key_id);
    println!("Issuer ID: {}", credential.issuer_id);

    Ok(())
}

/// Remove the stored credential
fn cmd_auth_clear() -> Result<(), CliError> {
    KeyringStore::default().delete(KEYRING_ACCOUNT)?;
    println!("Removed stored credential.");
    Ok(())
}

/// Render the request a mutating command would send, without sending it.
fn render_dry_run(request: &ApiRequest, json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", render_json(request)?);
        return Ok(());
    }

    println!("dry-run: request not sent");
    println!("{} {}", request.method, request.path);
    for (name, value) in &request.query {
        println!("  ?{}={}", name, value);
    }
    if let Some(key) = &request.idempotency_key {
        println!("  X-Idempotency-Key: {}", key);
    }
    if let Some(body) = &request.body {
        println!("{}", render_json(body)?);
    }

    Ok(())
}

fn render_json<S: serde::Serialize>(value: &S) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(value).context("render JSON output")?)
}

/// One listing line: id, name, status when present.
fn render_resource_line(resource: &Resource) -> String {
    let name = resource.attribute_str("name");
    match resource.status() {
        Some(status) => format!("{:<24} {:<32} {}", resource.id, name, status),
        None => format!("{:<24} {}", resource.id, name),
    }
}
