use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::Rng;
use serde::Serialize;
use tracing::{info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

use tollgate::config::{BackendKind, TollgateConfig};
use tollgate::context::{BufferedResponse, CallContext, StaticRequest};
use tollgate::ratelimit::{DistributedCounterBackend, LocalTokenBucketBackend, RateLimiterBackend, RuleSet};
use tollgate::{DenyReason, FallbackRenderer, Outcome, RateLimitInterceptor};

#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about = "Per-operation rate limiting")]
struct Cli {
    /// Configuration file (YAML); `TOLLGATE__*` environment variables override it
    #[arg(short, long)]
    config: Option<String>,

    /// Rules file, overriding `rules_path` from the configuration
    #[arg(short, long)]
    rules: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the loaded rate limit rules
    Rules,
    /// Fire concurrent simulated calls at an operation and report the decisions
    Simulate {
        /// Operation name, as attached in the rules file
        #[arg(short, long)]
        operation: String,

        /// Number of concurrent calls
        #[arg(short = 'n', long, default_value_t = 10)]
        calls: usize,

        /// Number of distinct simulated client addresses
        #[arg(long, default_value_t = 1)]
        clients: u8,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Default, Serialize)]
struct SimulationReport {
    operation: String,
    backend: &'static str,
    calls: usize,
    allowed: usize,
    rate_limited: usize,
    backend_unavailable: usize,
    invalid_key: usize,
    elapsed_ms: u128,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TollgateConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let rules = match cli.rules.as_deref().or(config.rules_path.as_deref()) {
        Some(path) => RuleSet::from_file(path).with_context(|| format!("loading rules from {}", path))?,
        None => RuleSet::new(),
    };
    info!(rules = rules.len(), backend = ?config.limiter.backend, "Configuration loaded");

    match cli.command {
        Command::Rules => {
            for (operation, rule) in rules.iter() {
                println!(
                    "{operation}: key={:?} prefix={:?} dimension={:?} limit={} window={}s timeout={}ms",
                    rule.key, rule.prefix, rule.dimension, rule.limit, rule.window_secs, rule.acquire_timeout_ms
                );
            }
        }
        Command::Simulate {
            operation,
            calls,
            clients,
            json,
        } => {
            if rules.get(&operation).is_none() {
                anyhow::bail!("no rate limit rule attached to operation '{}'", operation);
            }

            let backend = build_backend(&config).await?;
            let interceptor = Arc::new(
                RateLimitInterceptor::new(backend)
                    .with_renderer(FallbackRenderer::from_config(&config.fallback))
                    .with_rules(rules),
            );

            let report = simulate(interceptor, operation, calls, clients.max(1)).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{}: {} calls via {} backend in {}ms -> {} allowed, {} rate limited, {} backend unavailable, {} invalid key",
                    report.operation,
                    report.calls,
                    report.backend,
                    report.elapsed_ms,
                    report.allowed,
                    report.rate_limited,
                    report.backend_unavailable,
                    report.invalid_key
                );
            }
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_backend(config: &TollgateConfig) -> anyhow::Result<Arc<dyn RateLimiterBackend>> {
    match config.limiter.backend {
        BackendKind::Distributed => {
            let backend = DistributedCounterBackend::connect(&config.limiter.redis_url)
                .await
                .context("connecting to the shared store")?;
            Ok(Arc::new(backend))
        }
        BackendKind::Local => {
            let backend = Arc::new(LocalTokenBucketBackend::from_config(&config.limiter));
            backend.clone().spawn_sweeper(config.limiter.sweep_interval());
            Ok(backend)
        }
    }
}

async fn simulate(
    interceptor: Arc<RateLimitInterceptor>,
    operation: String,
    calls: usize,
    clients: u8,
) -> SimulationReport {
    let started = Instant::now();

    let handles: Vec<_> = (0..calls)
        .map(|_| {
            let interceptor = interceptor.clone();
            let operation = operation.clone();
            let request_id = uuid::Uuid::new_v4();
            let client = rand::thread_rng().gen_range(1..=clients);

            let request = StaticRequest::new("127.0.0.1")
                .with_header("x-request-id", request_id.to_string())
                .with_header("x-forwarded-for", format!("203.0.113.{}", client));
            let ctx = CallContext::new(Arc::new(request), Arc::new(BufferedResponse::new()));

            tokio::spawn(
                async move { interceptor.execute_operation(&operation, ctx, || async {}).await }
                    .instrument(info_span!("call", %request_id)),
            )
        })
        .collect();

    let mut report = SimulationReport {
        operation,
        backend: interceptor.backend_name(),
        calls,
        ..Default::default()
    };

    for result in futures::future::join_all(handles).await {
        match result {
            Ok(Ok(Outcome::Completed(()))) => report.allowed += 1,
            Ok(Ok(Outcome::Suppressed(DenyReason::RateLimited))) => report.rate_limited += 1,
            Ok(Ok(Outcome::Suppressed(DenyReason::BackendUnavailable))) => report.backend_unavailable += 1,
            Ok(Err(e)) if e.is_invalid_key() => report.invalid_key += 1,
            Ok(Err(e)) => tracing::error!(error = %e, "Simulated call failed"),
            Err(e) => tracing::error!(error = %e, "Simulated call task panicked"),
        }
    }

    report.elapsed_ms = started.elapsed().as_millis();
    report
}
