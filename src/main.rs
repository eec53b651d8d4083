//! REVEALQR command-line entrypoint

use clap::Parser;
use revealqr::report::render_outcome;
use revealqr::{
    ArtifactExporter, Error, ExportOrchestrator, ExportOutcome, Notice, Notifier,
    OverlayFailurePolicy, ReflectionPayload, Result, RevealConfig, logging,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "revealqr",
    version,
    about = "Render a reveal QR code with a marker and share or download it as PNG"
)]
struct Cli {
    /// Reveal URL to encode
    #[arg(value_name = "URL", required_unless_present = "event_id")]
    url: Option<String>,

    /// Build the reveal URL from an event id and the configured base URL
    #[arg(long, value_name = "ID", conflicts_with = "url")]
    event_id: Option<String>,

    /// Optional configuration file (toml/yaml). Defaults to revealqr.{toml,yaml} in cwd/XDG config.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Marker image path or base64 data URI
    #[arg(long, value_name = "SOURCE")]
    marker: Option<String>,

    /// Output edge length in pixels
    #[arg(long, value_name = "PX")]
    size: Option<u32>,

    /// Error-correction level (L, M, Q, H)
    #[arg(long, value_name = "LEVEL")]
    level: Option<String>,

    /// Draw the marker over the modules instead of excavating them
    #[arg(long)]
    no_excavate: bool,

    /// Export without the marker if it fails to load
    #[arg(long)]
    proceed_without_marker: bool,

    /// Directory for downloads when sharing is unavailable
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Share command; `{file}` and `{title}` are substituted
    #[arg(long, value_name = "CMD", num_args = 1.., allow_hyphen_values = true)]
    share_command: Option<Vec<String>>,

    /// Decode the rasterized symbol back and warn on mismatch
    #[arg(long)]
    verify: bool,

    /// Also write the vector form of the symbol to this path
    #[arg(long, value_name = "PATH")]
    svg: Option<PathBuf>,

    /// Output results as formatted JSON instead of human-readable text
    #[arg(long)]
    json: bool,
}

/// Prints notices to stderr so stdout stays machine-readable
struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, notice: &Notice) {
        eprintln!("{}", notice.message());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RevealConfig::load(cli.config.as_deref())?;
    apply_cli_overrides(&mut config, &cli)?;

    logging::init(&config.logging)?;

    let payload = match (&cli.url, &cli.event_id) {
        (Some(url), _) => ReflectionPayload::new(url.clone())?,
        (None, Some(id)) => ReflectionPayload::for_event(&config.reveal.base_url, id)?,
        (None, None) => return Err(Error::InvalidPayload("no reveal URL given".to_string())),
    };

    let exporter = config.configure_exporter(ArtifactExporter::new(
        Arc::new(config.desktop_platform()),
        Arc::new(TerminalNotifier),
    ));
    let orchestrator =
        ExportOrchestrator::new(config.pipeline_settings(), config.marker_overlay()?, exporter);

    info!(payload = %payload, size = config.symbol.size, "exporting reveal QR");

    if let Some(path) = &cli.svg {
        let scene = orchestrator.present(payload.clone())?;
        tokio::fs::write(path, scene.to_svg()).await?;
        info!(path = %path.display(), "vector symbol written");
    } else {
        orchestrator.select(payload.clone());
    }

    let outcome = orchestrator.export().await;
    let rendered = render_outcome(&outcome, Some(&payload));

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&rendered.json)?);
    } else {
        for line in &rendered.human {
            println!("{line}");
        }
    }

    // already reported through the notice and the outcome lines
    if matches!(outcome, ExportOutcome::Failed(_)) {
        std::process::exit(1);
    }
    Ok(())
}

fn apply_cli_overrides(config: &mut RevealConfig, cli: &Cli) -> Result<()> {
    if let Some(marker) = &cli.marker {
        config.marker.source = Some(marker.clone());
    }
    if let Some(size) = cli.size {
        config.symbol.size = size;
    }
    if let Some(level) = &cli.level {
        config.symbol.level = level.parse()?;
    }
    if cli.no_excavate {
        config.marker.excavate = false;
    }
    if cli.proceed_without_marker {
        config.marker.on_failure = OverlayFailurePolicy::ProceedWithout;
    }
    if let Some(dir) = &cli.output_dir {
        config.export.download_dir = dir.clone();
    }
    if let Some(command) = &cli.share_command {
        config.export.share_command = Some(command.clone());
    }
    if cli.verify {
        config.export.verify_decode = true;
    }
    Ok(())
}
