use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use image::Rgba;
use serde_json::{json, Value};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use inkcalc::bbox::{self, DEFAULT_ANCHOR};
use inkcalc::color::{self, PALETTE};
use inkcalc::config::{out_root, Config};
use inkcalc::dispatch::Dispatcher;
use inkcalc::recognition::{FixtureRecognizer, Recognizer};
use inkcalc::render::BitmapTypesetter;
use inkcalc::script::{self, Script};
use inkcalc::session::{Completion, Session};

#[derive(Parser, Debug)]
#[command(
    name = "inkcalc",
    version,
    about = "Replay freehand maths drawings, submit them for recognition and render the answers"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Print the colour palette in JSON
    Palette,
    /// Replay a pointer/tool event script, submit, and write the annotated PNG
    Replay(ReplayArgs),
    /// Print the drawn-content bounding box of a PNG
    Bbox(BboxArgs),
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Event script JSON
    script: PathBuf,
    /// Output PNG path (default: $INKCALC_OUT_DIR/replay-<timestamp>.png)
    #[arg(long)]
    out: Option<PathBuf>,
    /// Config JSON path
    #[arg(long)]
    config: Option<PathBuf>,
    /// Recognition endpoint URL (overrides config and INKCALC_API_URL)
    #[arg(long)]
    endpoint: Option<String>,
    /// Answer every submission from this response JSON instead of the service
    #[arg(long)]
    response: Option<PathBuf>,
    /// Background colour behind the strokes, or "none" for transparent
    #[arg(long, default_value = "#000000")]
    background: String,
    /// Print replay metadata JSON to stdout
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
    /// Custom metadata sidecar path (default: <out>.json)
    #[arg(long)]
    sidecar: Option<PathBuf>,
    /// Disable metadata sidecar generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_sidecar: bool,
    /// Exit non-zero when any submission failed or was refused
    #[arg(long, action = ArgAction::SetTrue)]
    strict: bool,
}

#[derive(Args, Debug)]
struct BboxArgs {
    /// Image to scan (alpha > 0 counts as content)
    image: PathBuf,
    /// Print JSON instead of a one-line summary
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Commands => print_commands(),
        Commands::Palette => print_palette(),
        Commands::Replay(args) => command_replay(args),
        Commands::Bbox(args) => command_bbox(args),
    }
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({"name": "commands", "description": "Print supported commands in JSON"}),
        json!({"name": "palette", "description": "Print the colour palette in JSON"}),
        json!({
            "name": "replay",
            "description": "Replay an event script, submit for recognition, write annotated PNG + sidecar",
            "args": ["<script>", "--out", "--config", "--endpoint", "--response", "--background", "--json", "--sidecar", "--no-sidecar", "--strict"],
        }),
        json!({
            "name": "bbox",
            "description": "Print the drawn-content bounding box and anchor of an image",
            "args": ["<image>", "--json"],
        }),
    ];
    println!("{}", serde_json::to_string_pretty(&json!({ "commands": rows }))?);
    Ok(())
}

fn print_palette() -> Result<()> {
    let swatches: Vec<Value> = PALETTE
        .iter()
        .enumerate()
        .map(|(index, hex)| json!({"index": index, "color": hex}))
        .collect();
    println!("{}", serde_json::to_string_pretty(&json!({ "palette": swatches }))?);
    Ok(())
}

fn command_replay(args: ReplayArgs) -> Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(endpoint) = args.endpoint.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        config.recognizer.endpoint = endpoint.to_string();
    }
    let background = parse_background(&args.background)?;
    let script = Script::from_file(&args.script)?;

    let recognizer: Arc<dyn Recognizer> = match &args.response {
        Some(path) => Arc::new(FixtureRecognizer::from_file(path)?),
        None => Arc::new(config.recognizer.build()),
    };
    let mut session = Session::with_viewport(&config, script.width, script.height);
    let mut dispatcher = Dispatcher::new(recognizer);
    let wait = config.recognizer.timeout() + Duration::from_secs(5);
    let report = script::run(&script, &mut session, &mut dispatcher, wait)?;

    let mut typesetter = BitmapTypesetter::default();
    session.refresh(&mut typesetter);
    let surface = session
        .surface()
        .context("script left the session without a surface")?;
    let composed = typesetter.compose(surface, background);

    let out = args
        .out
        .unwrap_or_else(|| out_root().join(format!("replay-{}.png", timestamp_compact())));
    ensure_parent_dir(&out)?;
    composed
        .save(&out)
        .with_context(|| format!("failed to write PNG: {}", out.display()))?;

    let completions: Vec<Value> = report.completions.iter().map(completion_value).collect();
    let failed = report
        .completions
        .iter()
        .filter(|c| matches!(c, Completion::Failed { .. }))
        .count();
    let meta = json!({
        "image": abs_path(&out).display().to_string(),
        "generated_at": timestamp_iso(),
        "script": abs_path(&args.script).display().to_string(),
        "width": surface.width(),
        "height": surface.height(),
        "bbox": bbox::extract(surface),
        "anchor": session.anchor(),
        "annotations": session.annotations().items(),
        "latest_batch": session.annotations().latest_batch(),
        "variables": session.variables(),
        "completions": completions,
        "rejected": report.rejected,
        "last_error": session.last_error().map(|e| e.to_string()),
    });

    if !args.no_sidecar {
        let sidecar = args.sidecar.unwrap_or_else(|| default_sidecar_for(&out));
        write_json_pretty(&sidecar, &meta)?;
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&meta)?);
    } else {
        println!("{}", out.display());
        for label in typesetter.labels() {
            println!("  {}", label.text);
        }
    }

    if args.strict && (failed > 0 || !report.rejected.is_empty()) {
        bail!(
            "{} submission(s) failed and {} were refused",
            failed,
            report.rejected.len()
        );
    }
    Ok(())
}

fn command_bbox(args: BboxArgs) -> Result<()> {
    let img = image::open(&args.image)
        .with_context(|| format!("failed to open image: {}", args.image.display()))?
        .to_rgba8();
    let extent = bbox::extract(&img);
    let anchor = bbox::anchor_or(&img, DEFAULT_ANCHOR);
    if args.json {
        let value = json!({
            "image": abs_path(&args.image).display().to_string(),
            "width": img.width(),
            "height": img.height(),
            "empty": extent.is_none(),
            "bbox": extent,
            "anchor": anchor,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    match extent {
        Some(b) => println!(
            "{},{} -> {},{} ({}x{}) anchor {:.1},{:.1}",
            b.min_x,
            b.min_y,
            b.max_x,
            b.max_y,
            b.width(),
            b.height(),
            anchor.x,
            anchor.y
        ),
        None => println!("empty (default anchor {:.1},{:.1})", anchor.x, anchor.y),
    }
    Ok(())
}

fn parse_background(raw: &str) -> Result<Option<Rgba<u8>>> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("none") || trimmed.eq_ignore_ascii_case("transparent") {
        return Ok(None);
    }
    match color::parse_color(trimmed) {
        Some(c) => Ok(Some(c)),
        None => bail!("unrecognized background colour: {raw}"),
    }
}

fn completion_value(completion: &Completion) -> Value {
    match completion {
        Completion::Applied {
            ticket,
            annotations,
        } => json!({"ticket": ticket, "status": "applied", "annotations": annotations}),
        Completion::Failed { ticket, error } => {
            json!({"ticket": ticket, "status": "failed", "error": error.to_string()})
        }
        Completion::Discarded { ticket } => json!({"ticket": ticket, "status": "discarded"}),
    }
}

fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

fn default_sidecar_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{stem}.json"))
}

fn abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

fn timestamp_compact() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}
