//! TCP port probe implementation.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use super::Outcome;

/// Run a TCP connect probe against `host:port`.
pub async fn run_tcp_probe(address: &str, timeout: Duration) -> Outcome {
    let start = Instant::now();

    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_stream)) => {
            let latency_ms = start.elapsed().as_millis() as i64;
            Outcome::up("Connection successful", latency_ms)
        }
        Ok(Err(e)) => Outcome::down(format!("Error: {}", e)),
        Err(_) => Outcome::down("Error: connection timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_probe_refused() {
        // Port 1 on loopback should refuse immediately.
        let outcome = run_tcp_probe("127.0.0.1:1", Duration::from_secs(1)).await;
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("Error"));
    }

    #[tokio::test]
    async fn test_tcp_probe_missing_port() {
        let outcome = run_tcp_probe("localhost", Duration::from_secs(1)).await;
        assert!(!outcome.success);
    }
}
