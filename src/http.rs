use std::fmt;

use reqwest::Method;

use crate::{ChannelFuture, ChannelRequest, ChannelResponse, Headers, TransportChannel};

/// Direct channel backed by a `reqwest` client.
///
/// Timeouts are supervised by the controller, so none is set here. Native
/// requests carry no ambient browser credentials, so the credentialed flag
/// has nothing to toggle.
#[derive(Clone, Default)]
pub struct HttpChannel {
    http: reqwest::Client,
}

impl fmt::Debug for HttpChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpChannel").finish_non_exhaustive()
    }
}

impl HttpChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured client (proxies, TLS roots, default headers).
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl TransportChannel for HttpChannel {
    fn open(&self, request: ChannelRequest) -> ChannelFuture {
        let http = self.http.clone();
        Box::pin(send(http, request))
    }
}

async fn send(http: reqwest::Client, request: ChannelRequest) -> ChannelResponse {
    let method = match Method::from_bytes(request.method.as_bytes()) {
        Ok(method) => method,
        Err(_) => {
            tracing::warn!(method = %request.method, "invalid HTTP method");
            return ChannelResponse::failed();
        }
    };

    let mut builder = http.request(method, &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    tracing::debug!(url = %request.url, "direct request start");

    let response = match builder.send().await {
        Ok(response) => response,
        Err(err) => {
            tracing::debug!(url = %request.url, error = %err, "direct request failed");
            return ChannelResponse::failed();
        }
    };

    let status = response.status();
    let headers: Headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_owned(), value.to_owned()))
        })
        .collect();

    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => {
            tracing::debug!(url = %request.url, error = %err, "direct response body failed");
            return ChannelResponse::failed();
        }
    };

    tracing::debug!(url = %request.url, code = status.as_u16(), "direct request finished");

    ChannelResponse {
        code: status.as_u16(),
        reason: status.canonical_reason().map(str::to_owned),
        headers,
        body,
    }
}
