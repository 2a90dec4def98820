//! Boundary to the remote recognition/solving service.
//!
//! Request: `{"image": "data:image/png;base64,...", "dict_of_vars": {...}}`.
//! Response: `{"data": [{"expr": .., "result": .., "assign": ..}], ...}` or a
//! bare array of the same items.

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{ImageFormat, RgbaImage};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ureq::Agent;
use wait_timeout::ChildExt;

use crate::error::SubmitError;
use crate::variables::VariableContext;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8900/calculate";

/// One symbolic result for a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub expression: String,
    pub answer: String,
    pub is_assignment: bool,
}

impl RecognitionResult {
    pub fn new(expression: impl Into<String>, answer: impl Into<String>, is_assignment: bool) -> Self {
        Self {
            expression: expression.into(),
            answer: answer.into(),
            is_assignment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionRequest {
    pub image: String,
    pub dict_of_vars: VariableContext,
}

impl RecognitionRequest {
    /// Encodes the snapshot as a PNG data URL next to the variable bindings.
    pub fn from_snapshot(snapshot: &RgbaImage, variables: &VariableContext) -> Result<Self> {
        Ok(Self {
            image: png_data_url(snapshot)?,
            dict_of_vars: variables.clone(),
        })
    }
}

pub fn png_data_url(img: &RgbaImage) -> Result<String> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .context("failed to encode surface snapshot as PNG")?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(buf.into_inner())))
}

/// Anything that can turn a request into results. Called off the UI thread.
pub trait Recognizer: Send + Sync {
    fn recognize(&self, request: &RecognitionRequest) -> Result<Vec<RecognitionResult>, SubmitError>;
}

#[derive(Debug, Deserialize)]
struct WireResult {
    expr: String,
    result: Value,
    #[serde(default)]
    assign: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireResponse {
    Envelope {
        data: Vec<WireResult>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Bare(Vec<WireResult>),
}

/// Decodes a service response. Anything short of a complete, well-formed
/// result list is rejected as a whole.
pub fn parse_response(raw: &[u8]) -> Result<Vec<RecognitionResult>, SubmitError> {
    let parsed: WireResponse = serde_json::from_slice(raw)
        .map_err(|err| SubmitError::InvalidResponse(err.to_string()))?;
    let items = match parsed {
        WireResponse::Envelope {
            data,
            status,
            message,
        } => {
            if status.as_deref().is_some_and(|s| s.eq_ignore_ascii_case("error")) {
                return Err(SubmitError::InvalidResponse(
                    message.unwrap_or_else(|| "service reported an error".to_string()),
                ));
            }
            data
        }
        WireResponse::Bare(items) => items,
    };

    items
        .into_iter()
        .map(|item| {
            let answer = match item.result {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(SubmitError::InvalidResponse(format!(
                        "unsupported result for {:?}: {other}",
                        item.expr
                    )))
                }
            };
            Ok(RecognitionResult::new(item.expr, answer, item.assign))
        })
        .collect()
}

fn truncate_text(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect::<String>() + "...<truncated>"
}

/// POSTs the request JSON to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpRecognizer {
    endpoint: String,
    agent: Agent,
}

impl HttpRecognizer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout.max(Duration::from_secs(1))))
            .http_status_as_error(false)
            .build();
        Self {
            endpoint: endpoint.into(),
            agent: config.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Recognizer for HttpRecognizer {
    fn recognize(&self, request: &RecognitionRequest) -> Result<Vec<RecognitionResult>, SubmitError> {
        let body = serde_json::to_vec(request)
            .map_err(|err| SubmitError::TransportFailure(format!("failed to encode request: {err}")))?;
        debug!("POST {} ({} byte request)", self.endpoint, body.len());

        let mut resp = self
            .agent
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .send(&body[..])
            .map_err(|err| SubmitError::TransportFailure(format!("{}: {err}", self.endpoint)))?;
        let status = resp.status();
        let text = resp
            .body_mut()
            .read_to_string()
            .map_err(|err| SubmitError::TransportFailure(format!("failed to read response: {err}")))?;

        if !status.is_success() {
            warn!("{} answered {}", self.endpoint, status.as_u16());
            return Err(SubmitError::TransportFailure(format!(
                "{} answered {}: {}",
                self.endpoint,
                status.as_u16(),
                truncate_text(text.trim(), 400)
            )));
        }
        parse_response(text.as_bytes())
    }
}

/// Runs an external command per request: request JSON on stdin, response
/// JSON on stdout.
#[derive(Debug, Clone)]
pub struct CommandRecognizer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRecognizer {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Recognizer for CommandRecognizer {
    fn recognize(&self, request: &RecognitionRequest) -> Result<Vec<RecognitionResult>, SubmitError> {
        let body = serde_json::to_vec(request)
            .map_err(|err| SubmitError::TransportFailure(format!("failed to encode request: {err}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| SubmitError::TransportFailure(format!("{}: {err}", self.program)))?;
        debug!("spawned {} for recognition ({} byte request)", self.program, body.len());

        // Pipes are drained on their own threads so a large body or reply
        // cannot deadlock against the child.
        let stdin = child.stdin.take();
        let writer = thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(&body);
            }
        });
        let stdout = child.stdout.take();
        let reader = thread::spawn(move || {
            let mut out = Vec::new();
            if let Some(mut stdout) = stdout {
                let _ = stdout.read_to_end(&mut out);
            }
            out
        });
        let stderr = child.stderr.take();
        let err_reader = thread::spawn(move || {
            let mut out = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut out);
            }
            out
        });

        let timeout = self.timeout.max(Duration::from_secs(1));
        let status = child
            .wait_timeout(timeout)
            .map_err(|err| SubmitError::TransportFailure(err.to_string()))?;
        let Some(status) = status else {
            let _ = child.kill();
            let _ = child.wait();
            warn!("{} timed out after {}s", self.program, timeout.as_secs());
            return Err(SubmitError::TransportFailure(format!(
                "{} timed out after {}s",
                self.program,
                timeout.as_secs()
            )));
        };

        let _ = writer.join();
        let stdout = reader.join().unwrap_or_default();
        let stderr = err_reader.join().unwrap_or_default();

        if !status.success() {
            let detail = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&stdout).to_string()
            } else {
                stderr
            };
            return Err(SubmitError::TransportFailure(format!(
                "{} exited with {}: {}",
                self.program,
                status.code().unwrap_or(1),
                truncate_text(detail.trim(), 400)
            )));
        }
        parse_response(&stdout)
    }
}

/// The recognizer a configuration selects.
#[derive(Debug, Clone)]
pub enum Transport {
    Http(HttpRecognizer),
    Command(CommandRecognizer),
}

impl Recognizer for Transport {
    fn recognize(&self, request: &RecognitionRequest) -> Result<Vec<RecognitionResult>, SubmitError> {
        match self {
            Transport::Http(http) => http.recognize(request),
            Transport::Command(command) => command.recognize(request),
        }
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Raw(String),
    Fail(SubmitError),
}

/// Answers every request with the same canned reply.
#[derive(Debug)]
pub struct FixtureRecognizer {
    reply: Reply,
    last_request: Mutex<Option<RecognitionRequest>>,
}

impl FixtureRecognizer {
    /// Reply with raw response JSON, parsed on every call.
    pub fn from_json(raw: impl Into<String>) -> Self {
        Self::with_reply(Reply::Raw(raw.into()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read response fixture: {}", path.display()))?;
        Ok(Self::from_json(raw))
    }

    pub fn from_results(results: &[RecognitionResult]) -> Self {
        let data: Vec<Value> = results
            .iter()
            .map(|r| serde_json::json!({"expr": r.expression, "result": r.answer, "assign": r.is_assignment}))
            .collect();
        Self::from_json(serde_json::json!({ "data": data, "status": "success" }).to_string())
    }

    pub fn failing(error: SubmitError) -> Self {
        Self::with_reply(Reply::Fail(error))
    }

    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            last_request: Mutex::new(None),
        }
    }

    /// The most recent request received, if any.
    pub fn last_request(&self) -> Option<RecognitionRequest> {
        self.last_request.lock().ok().and_then(|guard| guard.clone())
    }
}

impl Recognizer for FixtureRecognizer {
    fn recognize(&self, request: &RecognitionRequest) -> Result<Vec<RecognitionResult>, SubmitError> {
        if let Ok(mut guard) = self.last_request.lock() {
            *guard = Some(request.clone());
        }
        match &self.reply {
            Reply::Raw(raw) => parse_response(raw.as_bytes()),
            Reply::Fail(err) => Err(err.clone()),
        }
    }
}
