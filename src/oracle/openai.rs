//! OpenAI-compatible vision client that grades snapshot visibility.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::OracleConfig;
use crate::oracle::{Estimate, Estimator};

const SYSTEM_PROMPT: &str = "\
You are an expert marine biologist and underwater visibility analyst for the \
Scripps Pier underwater camera in La Jolla, California.

The camera is fixed at ~4m (13ft) depth under Scripps Pier, looking through \
the pier pilings. The pilings serve as distance markers:

- Closest piling (right edge): ~4 ft (1.2m) from camera
- Mid-right piling: ~11 ft (3.4m) from camera
- Back-left piling: ~14 ft (4.3m) from camera
- Farthest visible pilings (center-left): ~30 ft (9m) from camera

You may be shown reference images before the image to evaluate:
1. A labeled diagram showing which piling is at 4ft, 11ft, 14ft, and 30ft (~25ft visibility).
2. A ~35ft exceptional visibility image where all pilings are sharp with texture and the sandy bottom is visible.
3. A ~25ft good visibility image where the 30ft pilings are faintly visible as silhouettes.
Use these to calibrate your estimates.

Visibility estimation guidelines (use the FULL range, do not round conservatively):
- If the 30ft pilings are clearly visible with sharp texture AND you can see \
the sandy bottom: 35 ft
- If the 30ft pilings are mostly visible, but less clear than the reference: 30ft
- If the 30ft pilings are faintly visible as silhouettes: 25ft
- If the 14ft piling is sharp with visible texture: 20 ft
- If the 14ft piling is hazy/faded silhouette: 15 ft
- If only the 11ft piling is visible: 10 ft
- If only the closest 4ft piling is clear: 5ft
- If barely anything is visible: <5 ft

Clearly go through the steps above. Think clearly.

IMPORTANT: If the image is NOT a valid underwater snapshot (e.g., error page, \
offline message, webpage screenshot, completely black frame, camera malfunction, \
animal blocking the lens, or anything else that prevents a reliable visibility \
reading), you MUST set visibility_ft to \"nan\".";

const USER_PROMPT: &str = "\
Analyze this underwater camera snapshot from Scripps Pier and estimate the \
visibility in feet.

Respond in this exact JSON format (no markdown, no code fences):
{\"visibility_ft\": <number or \"nan\">, \"conditions\": \"<brief description>\"}";

/// Well-known calibration files looked up under the reference directory.
const REFERENCE_FILES: &[(&str, &str)] = &[
    (
        "labeled_viz.png",
        "Labeled diagram (~25ft visibility) showing piling distances from camera:",
    ),
    (
        "great_visibility_35ft.png",
        "Reference: ~35ft exceptional visibility. All pilings sharp with texture, sandy bottom visible:",
    ),
    (
        "good_visibility_25ft.png",
        "Reference: ~25ft good visibility. 30ft pilings faintly visible as silhouettes:",
    ),
];

const MAX_COMPLETION_TOKENS: u32 = 5000;
const RATE_LIMIT_MARKERS: &[&str] = &["429", "rate_limit"];

/// A calibration image already encoded for the request payload.
#[derive(Clone)]
struct CalibrationImage {
    caption: String,
    data_url: String,
}

/// Blocking vision-oracle client for OpenAI-compatible endpoints.
///
/// Every failure mode degrades to the NaN-sentinel [`Estimate`] with a
/// distinguishing description; nothing escapes the client boundary.
#[derive(Clone)]
pub struct VisibilityOracle {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    max_retries: usize,
    references: Vec<CalibrationImage>,
}

impl VisibilityOracle {
    /// Builds a new oracle client.
    ///
    /// A missing API key is not an error here; it turns every later call into
    /// the "not configured" sentinel.
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            let auth = format!("Bearer {}", key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth).context("invalid oracle API key")?,
            );
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .context("failed to build oracle HTTP client")?;
        let endpoint = format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        );
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries.max(1),
            references: load_references(&config.reference_dir),
        })
    }

    fn build_content(&self, target_data_url: &str) -> Value {
        let mut content = Vec::new();
        for reference in &self.references {
            content.push(json!({"type": "text", "text": reference.caption}));
            content.push(json!({
                "type": "image_url",
                "image_url": {"url": reference.data_url},
            }));
        }
        content.push(json!({"type": "text", "text": USER_PROMPT}));
        content.push(json!({
            "type": "image_url",
            "image_url": {"url": target_data_url},
        }));
        Value::Array(content)
    }

    fn call(&self, body: &Value) -> std::result::Result<String, CallFailure> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(body)
            .send()
            .map_err(|err| CallFailure::from_text(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| CallFailure::from_text(err.to_string()))?;
        if !status.is_success() {
            return Err(CallFailure {
                rate_limited: status == StatusCode::TOO_MANY_REQUESTS
                    || has_rate_limit_marker(&text),
                message: format!(
                    "HTTP {status}: {}",
                    text.chars().take(200).collect::<String>()
                ),
            });
        }
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|err| CallFailure::hard(format!("unexpected response shape: {err}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| CallFailure::hard("response contained no choices"))
    }
}

impl Estimator for VisibilityOracle {
    fn estimate(&self, image: &Path) -> Estimate {
        if self.api_key.is_none() {
            return Estimate::unusable("OPENAI_API_KEY not set");
        }
        let bytes = match fs::read(image) {
            Ok(bytes) => bytes,
            Err(err) => {
                return Estimate::unusable(format!(
                    "error: failed to read {}: {err}",
                    image.display()
                ))
            }
        };
        let media_type = match image.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("png") => "image/png",
            _ => "image/jpeg",
        };
        let target = format!("data:{media_type};base64,{}", BASE64.encode(&bytes));
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": self.build_content(&target)},
            ],
            "max_completion_tokens": MAX_COMPLETION_TOKENS,
        });

        for attempt in 0..self.max_retries {
            match self.call(&body) {
                Ok(raw) => {
                    return match parse_estimate(&raw) {
                        Ok(estimate) => estimate,
                        Err(err) => Estimate::unusable(format!("error: {err:#}")),
                    }
                }
                Err(failure) if failure.rate_limited => {
                    if attempt + 1 < self.max_retries {
                        let wait = rate_limit_backoff(attempt);
                        eprintln!("  Rate limited, retrying in {}s...", wait.as_secs());
                        thread::sleep(wait);
                    }
                }
                Err(failure) => return Estimate::unusable(format!("error: {}", failure.message)),
            }
        }
        Estimate::unusable("error: rate limit retries exhausted")
    }
}

struct CallFailure {
    rate_limited: bool,
    message: String,
}

impl CallFailure {
    fn from_text(message: String) -> Self {
        Self {
            rate_limited: has_rate_limit_marker(&message),
            message,
        }
    }

    fn hard(message: impl Into<String>) -> Self {
        Self {
            rate_limited: false,
            message: message.into(),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

fn has_rate_limit_marker(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|marker| lowered.contains(marker))
}

fn rate_limit_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(16) as u32;
    Duration::from_secs((1u64 << capped) + 1)
}

fn load_references(dir: &Path) -> Vec<CalibrationImage> {
    REFERENCE_FILES
        .iter()
        .filter_map(|(file, caption)| {
            let bytes = fs::read(dir.join(file)).ok()?;
            Some(CalibrationImage {
                caption: (*caption).to_string(),
                data_url: format!("data:image/png;base64,{}", BASE64.encode(bytes)),
            })
        })
        .collect()
}

/// Decodes the oracle's reply text into an estimate.
///
/// A missing or literal-"nan" visibility field is the sentinel, not an error;
/// anything unparseable is an error the caller degrades on.
fn parse_estimate(raw: &str) -> Result<Estimate> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body).context("oracle reply was not valid JSON")?;
    let conditions = value
        .get("conditions")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let visibility_ft = match value.get("visibility_ft") {
        None | Some(Value::Null) => f64::NAN,
        Some(Value::Number(number)) => number.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(text)) if text.eq_ignore_ascii_case("nan") => f64::NAN,
        Some(Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .with_context(|| format!("unparseable visibility value {text:?}"))?,
        Some(other) => anyhow::bail!("unexpected visibility value {other}"),
    };
    Ok(Estimate {
        visibility_ft,
        conditions,
    })
}

/// Strips an optional markdown code fence wrapping the reply.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    let body = rest.rsplit_once("```").map(|(body, _)| body).unwrap_or(rest);
    body.trim()
}
