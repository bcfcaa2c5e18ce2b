use anyhow::{Context, Result};
use std::time::Duration;

/// Build the shared outbound client with a hard request timeout.
///
/// System proxy discovery is opt-in via `LISTMATE_ENABLE_SYSTEM_PROXY`; when it
/// fails the client is rebuilt with proxies disabled.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    let allow_system_proxy = std::env::var("LISTMATE_ENABLE_SYSTEM_PROXY")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if allow_system_proxy {
        match attempt_build(timeout, false) {
            Ok(client) => return Ok(client),
            Err(e) => tracing::warn!(
                "HTTP client with system proxy discovery failed ({}); retrying with no_proxy",
                e
            ),
        }
    }

    attempt_build(timeout, true).context("Failed to initialize HTTP client")
}

fn attempt_build(timeout: Duration, no_proxy: bool) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if no_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}
