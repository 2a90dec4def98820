//! Runtime configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all) is a
//! valid configuration. `INKCALC_API_URL` overrides the recognition endpoint
//! after the file is read.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::annotation::DEFAULT_STEP;
use crate::bbox::DEFAULT_ANCHOR;
use crate::color::{parse_color, DEFAULT_COLOR};
use crate::geom::Point;
use crate::recognition::{CommandRecognizer, HttpRecognizer, Transport, DEFAULT_ENDPOINT};
use crate::tool::{ToolState, DEFAULT_ERASER_WIDTH, DEFAULT_PENCIL_WIDTH};

pub const ENDPOINT_ENV: &str = "INKCALC_API_URL";
pub const OUT_DIR_ENV: &str = "INKCALC_OUT_DIR";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recognizer: RecognizerConfig,
    pub tools: ToolConfig,
    pub layout: LayoutConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// URL the request is POSTed to when `command` is empty.
    pub endpoint: String,
    /// Custom recognizer program; receives request JSON on stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            command: Vec::new(),
            timeout_secs: 60,
        }
    }
}

impl RecognizerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// HTTP to `endpoint` unless a custom command is configured.
    pub fn build(&self) -> Transport {
        match self.command.split_first() {
            Some((program, args)) => {
                Transport::Command(CommandRecognizer::new(program.clone(), args.to_vec(), self.timeout()))
            }
            None => Transport::Http(HttpRecognizer::new(self.endpoint.clone(), self.timeout())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub color: String,
    pub pencil_width: u32,
    pub eraser_width: u32,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            color: "rgb(255, 255, 255)".to_string(),
            pencil_width: DEFAULT_PENCIL_WIDTH,
            eraser_width: DEFAULT_ERASER_WIDTH,
        }
    }
}

impl ToolConfig {
    /// Initial tool; an unparseable colour falls back to white.
    pub fn initial_tool(&self) -> ToolState {
        let color: Rgba<u8> = parse_color(&self.color).unwrap_or(DEFAULT_COLOR);
        ToolState::new(color, self.pencil_width, self.eraser_width)
    }
}

/// What a successful submission does to annotations from earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationPolicy {
    /// Keep every earlier annotation.
    #[default]
    Accumulate,
    /// Drop earlier annotations once new results arrive.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub annotation_step: f64,
    pub default_anchor: Point,
    pub policy: AnnotationPolicy,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            annotation_step: DEFAULT_STEP,
            default_anchor: DEFAULT_ANCHOR,
            policy: AnnotationPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config JSON: {}", path.display()))
    }

    /// Reads `path` when given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(endpoint) = env::var(ENDPOINT_ENV).ok().filter(|v| !v.trim().is_empty()) {
            config.recognizer.endpoint = endpoint.trim().to_string();
        }
        Ok(config)
    }
}

/// Directory for generated output when no explicit path is given.
pub fn out_root() -> PathBuf {
    env::var(OUT_DIR_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".inkcalc"))
}
