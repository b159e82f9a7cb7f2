//! Outbound HTTP plumbing shared by the document store and identity provider
//! clients.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};

/// Client with a total timeout applied to every request.
pub fn http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("reactions-api/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Sends an idempotent request, retrying once if the first attempt times out.
///
/// Only use for reads: a timed-out write may still have been applied.
pub async fn send_idempotent(request: RequestBuilder) -> reqwest::Result<Response> {
    let retry = request.try_clone();

    match request.send().await {
        Err(err) if err.is_timeout() => match retry {
            Some(retry) => {
                tracing::warn!(error = %err, "upstream read timed out, retrying once");
                retry.send().await
            }
            None => Err(err),
        },
        result => result,
    }
}
