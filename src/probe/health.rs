//! Service health probe: fetches a structured health endpoint and parses
//! the reported status.

use std::time::{Duration, Instant};

use serde_json::Value;

use super::Outcome;

/// Run a service-health probe against a JSON health endpoint.
///
/// A non-2xx response or an unparseable payload is a failure; otherwise the
/// top-level status indicator decides.
pub async fn run_health_probe(address: &str, timeout: Duration) -> Outcome {
    let url = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(e) => return Outcome::down(format!("Error: {}", e)),
    };

    let start = Instant::now();

    let response = match client.get(&url).send().await {
        Ok(r) => r,
        Err(e) if e.is_timeout() => return Outcome::down("Error: request timed out"),
        Err(e) => return Outcome::down(format!("Error: {}", e)),
    };

    let status = response.status();
    if !status.is_success() {
        return Outcome::down(format!("HTTP {}", status.as_u16()));
    }

    let body = match response.text().await {
        Ok(b) => b,
        Err(e) => return Outcome::down(format!("Error: {}", e)),
    };
    let latency_ms = start.elapsed().as_millis() as i64;

    match parse_health_payload(&body) {
        Ok(true) => Outcome::up("service reports up", latency_ms),
        Ok(false) => Outcome::down("service reports down"),
        Err(message) => Outcome::down(message),
    }
}

/// Extract the up/down indicator from a health payload.
fn parse_health_payload(body: &str) -> Result<bool, String> {
    let payload: Value =
        serde_json::from_str(body).map_err(|e| format!("Error: invalid health payload: {}", e))?;

    let indicator = payload
        .get("status")
        .or_else(|| payload.get("state"))
        .or_else(|| payload.get("health"))
        .ok_or_else(|| "Error: health payload has no status field".to_string())?;

    Ok(indicates_up(indicator))
}

/// Accepted spellings of "up" in a health status field.
fn indicates_up(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(
            s.to_ascii_lowercase().as_str(),
            "up" | "ok" | "healthy" | "pass" | "passing" | "operational"
        ),
        _ => false,
    }
}
