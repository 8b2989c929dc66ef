//! Probe executors for entity health checks.
//!
//! Supports PING, HTTP_GET, TCP_PORT, and SERVICE_HEALTH checks.

mod health;
mod http;
mod ping;
mod tcp;

pub use health::*;
pub use http::*;
pub use ping::*;
pub use tcp::*;

use std::time::Duration;

use crate::db::CheckType;

/// Extra time allowed past the configured timeout before an executor is
/// abandoned outright.
const TIMEOUT_GRACE: Duration = Duration::from_secs(2);

/// The result of a single probe execution.
///
/// Probes never fail with an error: anything that goes wrong becomes a
/// failed outcome with a descriptive message.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
    pub latency_ms: Option<i64>,
}

impl Outcome {
    pub fn up(message: impl Into<String>, latency_ms: i64) -> Self {
        Self {
            success: true,
            message: message.into(),
            latency_ms: Some(latency_ms),
        }
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            latency_ms: None,
        }
    }
}

/// A fully resolved probe request: check type, target, and limits.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub check_type: CheckType,
    pub target: String,
    pub timeout: Duration,
    pub expected_status: u16,
}

/// Run a probe for the given request.
///
/// The executor's own deadline is backstopped by a hard outer timeout, so a
/// hung target cannot block the calling worker past `timeout + grace`.
pub async fn run_probe(request: &ProbeRequest) -> Outcome {
    // Add jitter to avoid thundering herd
    let jitter = rand::random::<u64>() % 100;
    tokio::time::sleep(Duration::from_millis(jitter)).await;

    let executor = async {
        match request.check_type {
            CheckType::Ping => run_ping_probe(&request.target, request.timeout).await,
            CheckType::TcpPort => run_tcp_probe(&request.target, request.timeout).await,
            CheckType::HttpGet => {
                run_http_probe(&request.target, request.timeout, request.expected_status).await
            }
            CheckType::ServiceHealth => run_health_probe(&request.target, request.timeout).await,
            CheckType::None => Outcome::down("no check configured"),
        }
    };

    match tokio::time::timeout(request.timeout + TIMEOUT_GRACE, executor).await {
        Ok(outcome) => outcome,
        Err(_) => Outcome::down(format!(
            "Error: probe abandoned after {}s",
            request.timeout.as_secs()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_none_check_type_fails() {
        let request = ProbeRequest {
            check_type: CheckType::None,
            target: String::new(),
            timeout: Duration::from_secs(1),
            expected_status: 200,
        };
        let outcome = run_probe(&request).await;
        assert!(!outcome.success);
    }
}
