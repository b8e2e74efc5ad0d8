//! Oracle model discovery.
//!
//! Pings the configured Ollama instance and lists the locally downloaded
//! models from its `/api/tags` endpoint, so the operator learns before the
//! first cycle whether the oracle can answer at all.

use std::time::Duration;

use serde::Deserialize;

/// A single model entry returned by Ollama's `/api/tags` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModel {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

/// Ping the Ollama server and return the list of available models.
///
/// Returns `Err(reason)` when the server is offline or answers with
/// something other than a tag list.
pub fn fetch_models(base_url: &str, timeout: Duration) -> Result<Vec<OllamaModel>, String> {
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
    let response = client
        .get(&url)
        .send()
        .map_err(|e| format!("Ollama unreachable at {}: {}", url, e))?;

    if !response.status().is_success() {
        return Err(format!("Ollama returned HTTP {}", response.status()));
    }

    let tags: TagsResponse = response
        .json()
        .map_err(|e| format!("Failed to parse Ollama response: {}", e))?;

    Ok(tags.models)
}

/// `true` when `wanted` is among `models`.  A name without a tag matches
/// the `:latest` tag.
pub fn has_model(models: &[OllamaModel], wanted: &str) -> bool {
    let normalize = |name: &str| {
        if name.contains(':') {
            name.to_string()
        } else {
            format!("{name}:latest")
        }
    };
    let wanted = normalize(wanted.trim());
    models.iter().any(|m| normalize(&m.name) == wanted)
}
