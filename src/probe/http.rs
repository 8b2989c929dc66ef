//! HTTP probe implementation.

use std::time::{Duration, Instant};

use super::Outcome;

/// Run an HTTP GET probe against the given address.
///
/// Success means the response status code equals `expected_status`.
pub async fn run_http_probe(address: &str, timeout: Duration, expected_status: u16) -> Outcome {
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

    match client.get(&url).send().await {
        Ok(response) => {
            let latency_ms = start.elapsed().as_millis() as i64;
            let status = response.status().as_u16();
            if status == expected_status {
                Outcome::up(format!("HTTP {}", status), latency_ms)
            } else {
                Outcome::down(format!("HTTP {}, expected {}", status, expected_status))
            }
        }
        Err(e) if e.is_timeout() => Outcome::down("Error: request timed out"),
        Err(e) => Outcome::down(format!("Error: {}", e)),
    }
}
