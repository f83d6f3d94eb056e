use anyhow::{Context, Result};
use apnasquad_server::{Api, App, Secrets, ServerConfig};
use apnasquad_server::store::Store;
use apnasquad_types::Amount;
use clap::Parser;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() -> Result<()> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        });

    if let Some(endpoint) = endpoint {
        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "apnasquad-server".to_string());
        let rate = std::env::var("OTEL_SAMPLING_RATE")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .map(|value| value.clamp(0.0, 1.0))
            .unwrap_or(1.0);
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .context("failed to build OTLP exporter")?;
        let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(rate))
            .with_resource(
                opentelemetry_sdk::Resource::builder_empty()
                    .with_attributes([opentelemetry::KeyValue::new("service.name", service_name)])
                    .build(),
            )
            .with_batch_exporter(exporter)
            .build();
        let tracer = tracer_provider.tracer("apnasquad-server");
        opentelemetry::global::set_tracer_provider(tracer_provider);

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(LevelFilter::INFO))
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind (default: localhost).
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, default_value_t = 8000)]
    port: u16,

    /// Path to the SQLite database.
    #[arg(long, default_value = "apnasquad.db")]
    db_path: PathBuf,

    /// HTTP rate limit per IP in requests per hour (0 disables rate limiting).
    #[arg(long)]
    http_rate_limit_per_hour: Option<u64>,

    /// HTTP rate limit burst size (0 disables rate limiting).
    #[arg(long)]
    http_rate_limit_burst: Option<u32>,

    /// Max request body size in bytes (0 disables limit).
    #[arg(long)]
    http_body_limit_bytes: Option<usize>,

    /// Max profile upload size in bytes (0 disables limit).
    #[arg(long)]
    upload_body_limit_bytes: Option<usize>,

    /// Largest single withdrawal in whole rupees (0 disables limit).
    #[arg(long)]
    max_withdrawal_rupees: Option<u32>,

    /// Access token lifetime in seconds.
    #[arg(long)]
    access_token_ttl_secs: Option<u64>,

    /// Refresh token lifetime in seconds.
    #[arg(long)]
    refresh_token_ttl_secs: Option<u64>,

    /// Wrong OTP guesses allowed before the code is locked.
    #[arg(long)]
    otp_max_attempts: Option<u32>,

    /// Key prefix for OTP entries in Redis.
    #[arg(long)]
    cache_prefix: Option<String>,
}

fn is_production() -> bool {
    matches!(
        std::env::var("NODE_ENV").as_deref(),
        Ok("production") | Ok("prod")
    )
}

/// Maps an optional arg value to Option: 0 => None, Some(v) => Some(v), None => default
fn map_optional_limit<T: Copy + PartialEq + From<u8>>(
    arg: Option<T>,
    default: Option<T>,
) -> Option<T> {
    match arg {
        Some(v) if v == T::from(0) => None,
        Some(v) => Some(v),
        None => default,
    }
}

fn build_config(args: &Args) -> Result<ServerConfig> {
    let defaults = ServerConfig::default();
    if let Some(0) = args.access_token_ttl_secs {
        anyhow::bail!("access_token_ttl_secs must be > 0 when set");
    }
    if let Some(0) = args.refresh_token_ttl_secs {
        anyhow::bail!("refresh_token_ttl_secs must be > 0 when set");
    }
    let max_withdrawal = match args.max_withdrawal_rupees {
        Some(0) => None,
        Some(rupees) => Some(Amount::from_rupees(i64::from(rupees))),
        None => defaults.max_withdrawal,
    };
    Ok(ServerConfig {
        http_rate_limit_per_hour: map_optional_limit(
            args.http_rate_limit_per_hour,
            defaults.http_rate_limit_per_hour,
        ),
        http_rate_limit_burst: map_optional_limit(
            args.http_rate_limit_burst,
            defaults.http_rate_limit_burst,
        ),
        http_body_limit_bytes: map_optional_limit(
            args.http_body_limit_bytes,
            defaults.http_body_limit_bytes,
        ),
        upload_body_limit_bytes: map_optional_limit(
            args.upload_body_limit_bytes,
            defaults.upload_body_limit_bytes,
        ),
        max_withdrawal,
        access_token_ttl_secs: args
            .access_token_ttl_secs
            .unwrap_or(defaults.access_token_ttl_secs),
        refresh_token_ttl_secs: args
            .refresh_token_ttl_secs
            .unwrap_or(defaults.refresh_token_ttl_secs),
        otp_max_attempts: args.otp_max_attempts.unwrap_or(defaults.otp_max_attempts),
        cache_prefix: args
            .cache_prefix
            .clone()
            .unwrap_or_else(|| defaults.cache_prefix.clone()),
        ..defaults
    })
}

fn require_env(var: &str) -> Result<String> {
    let value = std::env::var(var).unwrap_or_default();
    if value.trim().is_empty() {
        anyhow::bail!("Missing required env: {var}");
    }
    Ok(value)
}

fn ensure_production_env() -> Result<()> {
    if !is_production() {
        return Ok(());
    }
    require_env("ALLOWED_HTTP_ORIGINS")?;
    require_env("METRICS_AUTH_TOKEN")?;
    require_env("REDIS_URL")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    dotenv::dotenv().ok();
    let args = Args::parse();

    // Create logger
    init_tracing()?;

    ensure_production_env()?;
    let config = build_config(&args)?;
    let secrets = Secrets::from_env(is_production())?;

    let store = Store::open(&args.db_path)
        .with_context(|| format!("failed to open {}", args.db_path.display()))?;
    info!(path = %args.db_path.display(), "store opened");

    let app = Arc::new(App::from_secrets(config, store, secrets)?);
    let router = Api::new(app).router();

    // Start server
    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}
