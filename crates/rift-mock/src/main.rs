//! Rift Mock CLI
//!
//! Resolves a single request against one or more plugin configurations and
//! prints the resolved behaviour and the rendered response as JSON.
//!
//! Usage:
//!   rift-mock --config pets.yaml --method POST --path /pets --body '{"name":"Rex"}'

use anyhow::{bail, Context, Result};
use clap::Parser;
use rift_mock::{
    EngineConfig, HttpMethod, LifecycleHooks, MockRequest, PluginConfig, ReadResponseBehaviour,
    RenderedResponse, Resolution, ResolutionEngine,
};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Rift Mock response resolver
#[derive(Parser, Debug)]
#[command(name = "rift-mock")]
#[command(
    author,
    version,
    about = "Resolve a request against Rift mock resource configurations"
)]
struct Args {
    /// Plugin configuration file (YAML or JSON); repeat for several plugins
    #[arg(short, long = "config", required = true)]
    configs: Vec<PathBuf>,

    /// Engine configuration file (script engines, cache, store)
    #[arg(short, long, env = "RIFT_ENGINE_CONFIG")]
    engine_config: Option<PathBuf>,

    /// HTTP method of the request
    #[arg(short, long, default_value = "GET")]
    method: String,

    /// Request path, optionally with a query string
    #[arg(short, long)]
    path: String,

    /// Request header as `Name: value`; repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    body: Option<String>,

    /// Apply the configured response delay before printing
    #[arg(long)]
    simulate_delay: bool,

    /// Dump Prometheus metrics to stderr after resolving
    #[arg(long)]
    print_metrics: bool,
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => bail!("Invalid header '{raw}', expected 'Name: value'"),
    }
}

fn build_request(args: &Args) -> Result<MockRequest> {
    let method: HttpMethod = args.method.parse()?;
    let mut request = MockRequest::new(method, &args.path);
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        request = request.with_header(name, value);
    }
    if let Some(body) = &args.body {
        request = request.with_body(body.clone());
    }
    Ok(request)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.engine_config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load engine config {}", path.display()))?,
        None => EngineConfig::default().with_env_overrides()?,
    };

    let plugins = args
        .configs
        .iter()
        .map(|path| {
            PluginConfig::from_file(path)
                .with_context(|| format!("Failed to load plugin config {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    info!("Loaded {} plugin config(s)", plugins.len());

    let engine = ResolutionEngine::with_stores(config, plugins, LifecycleHooks::new())?;
    let request = build_request(&args)?;

    let outcome = engine.resolve(&request);
    let behaviour = match &outcome {
        Ok(Resolution::Matched(resolved)) => json!({
            "requestId": resolved.request_id,
            "resource": resolved.resource,
            "pathParams": resolved.path_params,
            "scripted": resolved.scripted,
            "type": resolved.behaviour_type().as_str(),
            "statusCode": resolved.behaviour.status_code(),
        }),
        Ok(Resolution::NotFound) => json!({ "type": "NOT_FOUND" }),
        Ok(Resolution::Rejected) => json!({ "type": "REJECTED" }),
        Err(e) => json!({ "type": "ERROR", "error": e.to_string() }),
    };

    let rendered = RenderedResponse::from_outcome(outcome);
    if args.simulate_delay {
        rendered.simulate_delay().await;
    }

    let output = json!({
        "resolvedAt": chrono::Utc::now().to_rfc3339(),
        "behaviour": behaviour,
        "response": rendered.to_json(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if args.print_metrics {
        eprint!("{}", rift_mock::metrics::collect_metrics());
    }
    Ok(())
}
