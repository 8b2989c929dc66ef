//! Ping probe implementation using ICMP echo.

use std::net::IpAddr;
use std::time::Duration;

use super::Outcome;

/// Run a ping probe against the given host or IP address.
pub async fn run_ping_probe(address: &str, timeout: Duration) -> Outcome {
    let ip = match resolve_address(address).await {
        Ok(ip) => ip,
        Err(message) => return Outcome::down(message),
    };

    let config = match ip {
        IpAddr::V4(_) => surge_ping::Config::default(),
        IpAddr::V6(_) => surge_ping::Config::builder()
            .kind(surge_ping::ICMP::V6)
            .build(),
    };

    let client = match surge_ping::Client::new(&config) {
        Ok(c) => c,
        Err(e) => return Outcome::down(format!("Error: {}", e)),
    };

    let mut pinger = client
        .pinger(ip, surge_ping::PingIdentifier(rand::random()))
        .await;
    pinger.timeout(timeout);

    match pinger.ping(surge_ping::PingSequence(0), &[]).await {
        Ok((_reply, duration)) => {
            let rtt_ms = duration.as_millis() as i64;
            Outcome::up(format!("{} ms", rtt_ms), rtt_ms)
        }
        Err(e) => Outcome::down(format!("Error: {}", e)),
    }
}

/// Resolve a hostname to an IP address.
async fn resolve_address(address: &str) -> Result<IpAddr, String> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<_> = tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| format!("Error: DNS resolution failed: {}", e))?
        .collect();

    addrs
        .into_iter()
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| format!("Error: no addresses found for {}", address))
}
