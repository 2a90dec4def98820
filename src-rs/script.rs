//! JSON event scripts that drive a session without a UI.
//!
//! ```json
//! {"width": 400, "height": 300, "events": [
//!   {"op": "press", "x": 20, "y": 20}, {"op": "move", "x": 80, "y": 20},
//!   {"op": "release"}, {"op": "submit"}, {"op": "wait"}
//! ]}
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use serde::Deserialize;

use crate::annotation::AnnotationId;
use crate::color::parse_color;
use crate::dispatch::Dispatcher;
use crate::geom::Point;
use crate::session::{Completion, Session};
use crate::tool::ToolMode;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Script {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Event {
    Press { x: f64, y: f64 },
    Move { x: f64, y: f64 },
    Release,
    Leave,
    Mode { mode: ToolMode },
    Toggle,
    Color { color: String },
    Swatch { index: usize },
    Width { width: u32 },
    Clear,
    Reset,
    Resize { width: u32, height: u32 },
    Submit,
    /// Block until every dispatched submission has reported back.
    Wait,
    Reposition { id: u64, x: f64, y: f64 },
}

impl Script {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read script: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse script JSON: {}", path.display()))
    }
}

/// What happened while a script ran.
#[derive(Debug, Default)]
pub struct RunReport {
    pub completions: Vec<Completion>,
    /// Submit events that were refused before anything was sent.
    pub rejected: Vec<String>,
}

/// Applies `script` to `session`. Submissions go through `dispatcher`; a
/// final implicit wait collects any still outstanding.
pub fn run(
    script: &Script,
    session: &mut Session,
    dispatcher: &mut Dispatcher,
    wait_timeout: Duration,
) -> Result<RunReport> {
    let mut report = RunReport::default();
    for (index, event) in script.events.iter().enumerate() {
        match event {
            Event::Press { x, y } => session.press(Point::new(*x, *y)),
            Event::Move { x, y } => session.move_to(Point::new(*x, *y)),
            Event::Release => session.release(),
            Event::Leave => session.leave(),
            Event::Mode { mode } => session.set_mode(*mode),
            Event::Toggle => {
                session.toggle_mode();
            }
            Event::Color { color } => match parse_color(color) {
                Some(parsed) => session.set_color(parsed),
                None => bail!("event {index}: unrecognized color {color:?}"),
            },
            Event::Swatch { index: swatch } => {
                if !session.select_swatch(*swatch) {
                    bail!("event {index}: no palette swatch {swatch}");
                }
            }
            Event::Width { width } => {
                session.set_width(*width);
            }
            Event::Clear => session.clear_surface(),
            Event::Reset => session.reset(),
            Event::Resize { width, height } => session.resize(*width, *height),
            Event::Submit => {
                if let Err(err) = dispatcher.submit(session) {
                    warn!("event {index}: submit refused: {err}");
                    report.rejected.push(err.to_string());
                }
            }
            Event::Wait => report
                .completions
                .extend(dispatcher.drain(session, wait_timeout)),
            Event::Reposition { id, x, y } => {
                if !session.reposition(AnnotationId(*id), Point::new(*x, *y)) {
                    warn!("event {index}: no annotation with id {id}");
                }
            }
        }
    }
    report
        .completions
        .extend(dispatcher.drain(session, wait_timeout));
    info!(
        "script finished: {} event(s), {} completion(s), {} annotation(s)",
        script.events.len(),
        report.completions.len(),
        session.annotations().len()
    );
    Ok(report)
}
