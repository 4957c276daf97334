//! Stock Probe Constructors
//!
//! Ready-made probe functions for the common cases, so plugins fronting an
//! HTTP service do not have to hand-roll a liveness check.

use std::sync::Arc;
use std::time::Duration;

use super::health::ProbeFn;

/// Probe that issues a GET against `url` and reports healthy on any 2xx.
///
/// Connection failures and non-success statuses are unhealthy; the per-probe
/// timeout enforced by the prober still applies on top of the client's own
/// connect timeout.
pub fn http_probe(url: impl Into<String>) -> ProbeFn {
    http_probe_with_client(default_client(), url)
}

/// [`http_probe`] with a caller-supplied client, for custom TLS or proxy
/// setups and for sharing one connection pool across probes.
pub fn http_probe_with_client(client: reqwest::Client, url: impl Into<String>) -> ProbeFn {
    let url = url.into();
    Arc::new(move || {
        let client = client.clone();
        let url = url.clone();
        Box::pin(async move {
            let response = client.get(&url).send().await?;
            Ok(response.status().is_success())
        })
    })
}

fn default_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        // The builder only fails when the TLS backend cannot initialize.
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    #[tokio::test]
    async fn test_http_probe_unreachable_is_error() {
        // Port 9 (discard) is about as reliably closed as it gets.
        let probe = http_probe("http://127.0.0.1:9/health");
        assert_err!(probe().await);
    }
}
