use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;

use cs_domain::config::{Config, CorsConfig, ObservabilityConfig};
use cs_gateway::api;
use cs_gateway::bootstrap;
use cs_gateway::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            let (config, config_path) = cs_gateway::cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            tracing::info!(config = %config_path, "configuration loaded");
            run_server(Arc::new(config), tracer_provider).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            init_cli_tracing();
            let (config, config_path) = cs_gateway::cli::load_config()?;
            if !cs_gateway::cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            init_cli_tracing();
            let (config, _) = cs_gateway::cli::load_config()?;
            cs_gateway::cli::config::show(&config)
        }
        Some(Command::Version) => {
            println!("chatstream {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for `serve`, plus an OTLP/gRPC export layer when
/// `otlp_endpoint` is configured. The returned provider must be shut down
/// on exit to flush pending spans.
fn init_tracing(obs: &ObservabilityConfig) -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cs_gateway=debug"));
    let fmt_layer = tracing_subscriber::fmt::layer().json();

    let Some(endpoint) = &obs.otlp_endpoint else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
        return None;
    };

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(e) => e,
        Err(e) => {
            eprintln!(
                "WARNING: failed to create OTLP exporter for {endpoint}: {e}; \
                 starting without OpenTelemetry"
            );
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
            return None;
        }
    };

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(obs.service_name.clone())
        .build();

    let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
            obs.sample_rate,
        ))
        .with_resource(resource)
        .build();

    let otel_layer =
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer("chatstream"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    Some(tracer_provider)
}

/// Compact stderr tracing at `warn` for one-shot commands.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run_server(
    config: Arc<Config>,
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
) -> anyhow::Result<()> {
    tracing::info!("chatstream starting");

    let state = bootstrap::build_app_state(config.clone())?;
    bootstrap::spawn_background_tasks(&state);

    let max_concurrent = config.server.max_concurrent_requests;
    tracing::info!(max_concurrent, "concurrency limit set");

    let app = api::router()
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&config.server.cors))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "chatstream listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;

    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = ?e, "OpenTelemetry tracer provider shutdown failed");
        }
    }
    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable; waiting for SIGINT only");
                let _ = ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}

/// Origins may end in `:*` to allow any port on that host; a lone `"*"`
/// allows every origin.
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::header;

    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let headers = [header::CONTENT_TYPE, header::AUTHORIZATION];

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\"; all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(headers);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            let origin = origin.to_str().unwrap_or("");
            wildcard_prefixes.iter().any(|prefix| {
                origin
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(methods)
        .allow_headers(headers)
}
