//! Straighten - four-point perspective correction from the command line
//!
//! Loads an image, takes the four corners of the region to straighten
//! (optionally as clicked on a scaled display of the image), and writes
//! the perspective-corrected result.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use straighten::config::Config;
use straighten::loader::{load_image, save_image};
use straighten::preview::{render_markers, MarkerStyle};
use straighten::{OutputSize, Sampling, Session, Size, WarpWorker};

/// Straighten - perspective-correct a quadrilateral region of an image
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input image (PNG or JPEG)
    input: PathBuf,

    /// Corner as X,Y; give four, clockwise from the top-left
    #[arg(short, long = "point", value_parser = parse_point)]
    points: Vec<(f64, f64)>,

    /// Size the points were picked on (e.g. 400x300); defaults to the image size
    #[arg(short, long)]
    display: Option<Size>,

    /// Output image path
    #[arg(short, long, default_value = "straightened.png")]
    output: PathBuf,

    /// Output size (e.g. 800x600); overrides the configured policy
    #[arg(long, conflicts_with = "estimate_size")]
    size: Option<Size>,

    /// Size the output from the edge lengths of the selection
    #[arg(long)]
    estimate_size: bool,

    /// Sampling strategy: nearest or bilinear
    #[arg(long, value_parser = parse_sampling)]
    sampling: Option<Sampling>,

    /// Also write the source with the selected points marked
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Print a JSON report of the session
    #[arg(long)]
    report: bool,

    /// Configuration file path (created with defaults if missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_point(s: &str) -> Result<(f64, f64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{}'", s))?;
    let x = x
        .trim()
        .parse()
        .map_err(|e| format!("invalid x '{}': {}", x, e))?;
    let y = y
        .trim()
        .parse()
        .map_err(|e| format!("invalid y '{}': {}", y, e))?;
    Ok((x, y))
}

fn parse_sampling(s: &str) -> Result<Sampling, String> {
    match s.to_ascii_lowercase().as_str() {
        "nearest" => Ok(Sampling::Nearest),
        "bilinear" => Ok(Sampling::Bilinear),
        other => Err(format!("unknown sampling '{}' (nearest, bilinear)", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Straighten v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => Config::load_or_create(path)?,
        None => Config::default(),
    };

    // Command-line values override the config file
    if let Some(sampling) = args.sampling {
        config.warp.sampling = sampling;
    }
    if let Some(size) = args.size {
        config.warp.output_size = OutputSize::Fixed(size);
    } else if args.estimate_size {
        config.warp.output_size = OutputSize::Estimated;
    }

    if args.points.len() != 4 {
        bail!("Exactly 4 points are required, got {}", args.points.len());
    }

    let image = load_image(&args.input)
        .await
        .with_context(|| format!("Failed to load {:?}", args.input))?;

    let mut session = Session::new(&config);
    session.load_image(image);

    let display_size = args.display.unwrap_or_else(|| session.native_size());
    info!("Points given on a {} display of a {} image", display_size, session.native_size());

    for (x, y) in &args.points {
        let p = session
            .add_point(*x, *y, display_size)
            .with_context(|| format!("Failed to add point {},{}", x, y))?;
        info!("Point {},{} -> {:.0},{:.0}", x, y, p.x, p.y);
    }

    if let (Some(path), Some(source)) = (&args.preview, session.image()) {
        let style = MarkerStyle::for_image(source.width(), source.height());
        let preview = render_markers(source, session.points(), &style);
        save_image(Arc::new(preview), path).await?;
    }

    let worker = WarpWorker::new(config.worker.in_flight);
    let output = session
        .straighten_with(&worker)
        .await
        .context("Failed to straighten image")?;

    save_image(output, &args.output).await?;

    if args.report {
        println!("{}", serde_json::to_string_pretty(&session.report())?);
    }

    Ok(())
}
