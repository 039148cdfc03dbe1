use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use print_engine::api;
use print_engine::models::{AppConfig, FontConfig, LimitsConfig, Overlay, RenderJob};
use print_engine::server;
use print_engine::services::{render_document, FontRegistry, OverlaySources};

#[derive(Parser)]
#[command(name = "print-engine")]
#[command(about = "Stamps serial numbers onto SVG templates and renders print-ready PDFs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve,
    /// Render a job offline, without object storage or HTTP
    Render {
        /// Render job as JSON (same body as POST /render). SVG overlay keys
        /// are read as files relative to this file.
        #[arg(short, long)]
        job: PathBuf,

        /// SVG template; replaces the job's svg_s3_key
        #[arg(short, long)]
        svg: PathBuf,

        /// Output PDF file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// List font families a job can request
    Fonts,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "print-engine API",
        description = "SVG template to PDF rendering with serial-number stamping",
        version = "0.3.0",
    ),
    paths(
        api::handle_render,
        api::handle_generate,
        api::handle_preview,
        api::handle_fonts,
        api::handle_health,
    ),
    components(schemas(
        print_engine::models::RenderJob,
        print_engine::models::PlacementMm,
        print_engine::models::SeriesSpec,
        print_engine::models::CustomFont,
        print_engine::models::Overlay,
        print_engine::models::SvgOverlay,
        print_engine::models::ImageOverlay,
        api::RenderResponse,
        api::ErrorResponse,
        print_engine::services::FontEntry,
        print_engine::services::FontSource,
        api::HealthResponse,
    )),
    tags(
        (name = "Render", description = "Serial-stamped PDF rendering"),
        (name = "Fonts", description = "Font discovery"),
        (name = "Health", description = "Liveness")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Render { job, svg, output }) => run_render_command(&job, &svg, &output),
        Some(Commands::Fonts) => run_fonts_command(),
        Some(Commands::Serve) | None => run_server().await,
    }
}

fn init_tracing(default_filter: &str, with_time: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);
    if with_time {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().without_time())
            .init();
    }
}

/// Render a job file straight to a PDF (no server needed)
fn run_render_command(job_path: &Path, svg_path: &Path, output: &Path) -> anyhow::Result<()> {
    // Minimal logging for CLI
    init_tracing("print_engine=warn", false);

    let lookup = |name: &str| std::env::var(name).ok();
    let fonts = FontRegistry::new(&FontConfig::from_lookup(lookup)?);
    let limits = LimitsConfig::from_lookup(lookup)?;

    let job: RenderJob = serde_json::from_slice(&std::fs::read(job_path)?)
        .map_err(|e| anyhow::anyhow!("Invalid job file {}: {e}", job_path.display()))?;
    job.validate(limits.max_series_count)?;
    let template = std::fs::read(svg_path)?;
    let overlays = read_overlay_files(&job, job_path.parent().unwrap_or(Path::new(".")))?;

    let result = render_document(&template, &job, &overlays, &fonts, &AtomicBool::new(false))
        .map_err(|e| anyhow::anyhow!("Render error: {e}"))?;

    std::fs::write(output, &result.pdf)?;
    println!(
        "Rendered {} ({} pages, {} bytes, font {})",
        output.display(),
        result.pages(),
        result.pdf.len(),
        result.metrics.font.family
    );
    println!("Serials: {}", result.serials().join(", "));
    println!("Template id: {}", result.template_id);

    Ok(())
}

/// Load SVG overlays from disk, keyed like the object store would key them
fn read_overlay_files(job: &RenderJob, base: &Path) -> anyhow::Result<OverlaySources> {
    let mut sources = OverlaySources::new();
    for overlay in &job.overlays {
        if let Overlay::Svg(svg) = overlay {
            let path = base.join(&svg.svg_s3_key);
            let data = std::fs::read(&path)
                .map_err(|e| anyhow::anyhow!("Cannot read overlay {}: {e}", path.display()))?;
            sources.insert(svg.svg_s3_key.clone(), data);
        }
    }
    Ok(sources)
}

/// Print resolvable font families
fn run_fonts_command() -> anyhow::Result<()> {
    init_tracing("print_engine=warn", false);

    let config = FontConfig::from_lookup(|name| std::env::var(name).ok())?;
    let fonts = FontRegistry::new(&config);

    println!("{} font faces loaded\n", fonts.face_count());
    for entry in fonts.list() {
        let source = serde_json::to_value(entry.source)?;
        println!("  {:<40} {}", entry.family, source.as_str().unwrap_or_default());
    }

    Ok(())
}

/// Run the HTTP server
async fn run_server() -> anyhow::Result<()> {
    init_tracing("print_engine=debug,tower_http=debug", true);

    let config = AppConfig::from_env()?;
    let bind_addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(
        env = %config.app_env,
        fonts_dir = ?config.fonts.fonts_dir,
        strict_fonts = config.fonts.strict,
        timeout_secs = config.limits.render_timeout.as_secs(),
        "Configuration loaded"
    );

    let state = server::create_app_state(config)?;

    let app = server::build_router(state)
        // OpenAPI documentation
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "print-engine listening");

    axum::serve(listener, app).await?;

    Ok(())
}
