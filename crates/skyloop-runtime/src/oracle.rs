//! [`Oracle`] – the advisory model behind the control loop.
//!
//! An oracle maps the current [`TelemetrySnapshot`] plus the operator's
//! command to one [`ProposedAction`].  The call is slow and unreliable, and
//! its answer is untrusted: [`Oracle::advise`] never fails, every transport
//! or protocol problem comes back as [`ProposedAction::Error`], and any reply
//! that does not name a known action is normalised to
//! [`ProposedAction::Hold`].
//!
//! [`OllamaOracle`] talks to a local [Ollama](https://ollama.com) server
//! through its `/api/generate` endpoint with `format: "json"`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use skyloop_runtime::oracle::{OllamaOracle, Oracle};
//! use skyloop_types::TelemetrySnapshot;
//!
//! # async fn demo() {
//! let oracle = OllamaOracle::new("http://localhost:11434", "llama3.2:1b", Duration::from_secs(60));
//! // Requires a running Ollama instance.
//! let action = oracle.advise(&TelemetrySnapshot::empty(1), "Take off to 10m").await;
//! println!("{action:?}");
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use skyloop_types::{ProposedAction, TelemetrySnapshot};
use thiserror::Error;
use tracing::{debug, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Safety rules
// ─────────────────────────────────────────────────────────────────────────────

/// Operating rules rendered into every prompt.  They steer the model; the
/// precondition gate enforces the hard limits regardless.
pub const SAFETY_RULES: &str = "\
## Safety Rules
- If battery remaining is below 15% and the drone is in the air, choose \"rtl\" when health.home_position_ok is true, otherwise \"land\".
- If the GPS fix type is 0 (no fix) or 1 (no GPS) and the drone is in the air, choose \"land\".
- If health.armable is false and the drone is neither armed nor in the air, choose \"error\" with message \"Pre-arm checks failed\".
- If the drone is disarmed on the ground and the command implies flight, choose \"arm\" first, then \"takeoff\" on a later turn.
- Prefer \"land\" or \"rtl\" over everything else when conditions are critical.
- Choose \"hold\" when nothing needs to be done or conditions for other actions are not met.";

/// Action menu with the preconditions of each entry, rendered into every
/// prompt.
const ACTION_CATALOGUE: &str = "\
## Actions
- {\"action\": \"takeoff\", \"altitude_m\": <float>}   (armed, on the ground)
- {\"action\": \"goto\", \"latitude_deg\": <float>, \"longitude_deg\": <float>, \"altitude_m\": <float>}   (armed, in the air, global_position_ok)
- {\"action\": \"land\"}   (armed, in the air)
- {\"action\": \"rtl\"}   (armed, in the air, home_position_ok)
- {\"action\": \"arm\"}   (not armed, on the ground, armable)
- {\"action\": \"disarm\"}   (armed, on the ground)
- {\"action\": \"hold\", \"reason\": <string>}
- {\"action\": \"error\", \"message\": <string>}   (unrecoverable problem or human input required)";

const NO_REASON: &str = "No specific reason.";
const NO_MESSAGE: &str = "No specific message.";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise talking to the oracle server.  They never leave this
/// module: [`OllamaOracle::advise`] turns them into an error action.
#[derive(Error, Debug)]
pub enum OracleError {
    /// The request could not be sent or timed out.
    #[error("Ollama connection failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a non-2xx status.
    #[error("Ollama API error {0}")]
    Status(u16),
    /// The response envelope could not be parsed.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Oracle trait
// ─────────────────────────────────────────────────────────────────────────────

/// Source of proposed actions.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Propose the next action for `snapshot` given the operator `command`.
    ///
    /// Infallible by contract: failures are reported as
    /// [`ProposedAction::Error`].
    async fn advise(&self, snapshot: &TelemetrySnapshot, command: &str) -> ProposedAction;
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// The JSON object the model is asked to reply with.  Only used to render
/// the schema into the prompt; replies are parsed leniently by
/// [`normalize_reply`].
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ActionReply {
    /// One of: takeoff, goto, land, rtl, arm, disarm, hold, error.
    action: String,
    altitude_m: Option<f64>,
    latitude_deg: Option<f64>,
    longitude_deg: Option<f64>,
    reason: Option<String>,
    message: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// OllamaOracle
// ─────────────────────────────────────────────────────────────────────────────

/// Oracle backed by Ollama's `/api/generate` endpoint.
///
/// Construct once and reuse across control cycles.
pub struct OllamaOracle {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaOracle {
    /// Create an oracle pointing at `base_url` (e.g. `"http://localhost:11434"`)
    /// using `model`.  Every request is bounded by `timeout`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeout; using defaults");
                reqwest::Client::new()
            });
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client,
        }
    }

    /// Send `prompt` and return the raw `response` text of the reply.
    ///
    /// # Errors
    ///
    /// [`OracleError::Http`] on transport failure, [`OracleError::Status`] on
    /// a non-2xx reply, [`OracleError::BadResponse`] when the envelope is not
    /// the expected JSON.
    pub async fn generate(&self, prompt: &str) -> Result<String, OracleError> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json",
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status(status.as_u16()));
        }

        let text = response.text().await?;
        let envelope: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| OracleError::BadResponse(e.to_string()))?;
        Ok(envelope.response.trim().to_string())
    }
}

#[async_trait]
impl Oracle for OllamaOracle {
    async fn advise(&self, snapshot: &TelemetrySnapshot, command: &str) -> ProposedAction {
        let prompt = render_prompt(snapshot, command);
        match self.generate(&prompt).await {
            Ok(raw) => {
                debug!(raw = %raw, "oracle raw reply");
                normalize_reply(&raw)
            }
            Err(e) => {
                warn!(error = %e, model = %self.model, "oracle request failed");
                ProposedAction::error(e.to_string())
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Prompt rendering
// ─────────────────────────────────────────────────────────────────────────────

/// Build the prompt for one cycle: telemetry, command, action catalogue,
/// safety rules and the reply schema.
pub fn render_prompt(snapshot: &TelemetrySnapshot, command: &str) -> String {
    let telemetry = serde_json::to_string_pretty(snapshot)
        .unwrap_or_else(|_| "(telemetry unavailable)".to_string());
    let schema = serde_json::to_string(&schema_for!(ActionReply)).unwrap_or_default();

    format!(
        "You are a drone mission planner and safety monitor. Respond to the operator's command \
         while keeping the drone safe, by choosing exactly one next action.\n\n\
         ## Current Telemetry\n\
         Readings that are null are unknown.\n{telemetry}\n\n\
         ## Operator Command\n\"{command}\"\n\n\
         {ACTION_CATALOGUE}\n\n\
         {SAFETY_RULES}\n\n\
         ## Reply Format\n\
         Output only a single JSON object matching this schema, without markdown fences or \
         any other text:\n{schema}\n"
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Reply normalisation
// ─────────────────────────────────────────────────────────────────────────────

/// Turn the oracle's raw reply into a [`ProposedAction`].
///
/// - Markdown code fences are stripped.
/// - Text that is not JSON becomes [`ProposedAction::Error`].
/// - JSON without a recognised `"action"` becomes [`ProposedAction::Hold`]
///   with a reason naming what was received.
/// - Parameters are read from the top level or from a nested `"data"`
///   object; numeric strings are accepted, anything else non-numeric is
///   treated as absent.
pub fn normalize_reply(raw: &str) -> ProposedAction {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let value: Value = match serde_json::from_str(cleaned.trim()) {
        Ok(v) => v,
        Err(e) => return ProposedAction::error(format!("LLM response not valid JSON: {e}")),
    };
    let Some(obj) = value.as_object() else {
        return ProposedAction::hold("Unknown LLM action: reply is not a JSON object");
    };
    let Some(action) = obj.get("action").and_then(Value::as_str) else {
        return ProposedAction::hold("Unknown LLM action: reply has no \"action\" field");
    };

    match action.trim().to_ascii_lowercase().as_str() {
        "takeoff" | "take_off" => ProposedAction::Takeoff {
            altitude_m: number(obj, "altitude_m"),
        },
        "arm" => ProposedAction::Arm,
        "disarm" => ProposedAction::Disarm,
        "goto" | "go_to" => ProposedAction::Goto {
            latitude_deg: number(obj, "latitude_deg"),
            longitude_deg: number(obj, "longitude_deg"),
            altitude_m: number(obj, "altitude_m"),
        },
        "land" => ProposedAction::Land,
        "rtl" | "return_to_launch" | "returntolaunch" => ProposedAction::ReturnToLaunch,
        "hold" => ProposedAction::hold(text(obj, "reason").unwrap_or_else(|| NO_REASON.into())),
        "error" => ProposedAction::error(text(obj, "message").unwrap_or_else(|| NO_MESSAGE.into())),
        other => ProposedAction::hold(format!("Unknown LLM action: {other:?}")),
    }
}

fn param<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key)
        .or_else(|| obj.get("data").and_then(|d| d.get(key)))
}

fn number(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    let n = match param(obj, key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    param(obj, key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
