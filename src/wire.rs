//! Wire format of the fallback channel.
//!
//! The request is folded into the loader URL's query string; the remote end
//! answers by invoking the named callback with a [`FallbackPayload`].

use serde::Deserialize;
use url::Url;

use crate::{ChannelRequest, ChannelResponse, EngineError, Headers, Result};

pub const CALLBACK_PARAM: &str = "callback";
pub const METHOD_PARAM: &str = "_method";
pub const HEADERS_PARAM: &str = "_headers";
pub const BODY_PARAM: &str = "_body";

/// Object the remote endpoint passes to the registered callback.
///
/// Every field is optional; a missing `code` means no response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct FallbackPayload {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Option<String>,
}

impl FallbackPayload {
    pub fn new(code: u16, body: impl Into<String>) -> Self {
        Self {
            code,
            body: Some(body.into()),
            ..Self::default()
        }
    }
}

impl From<FallbackPayload> for ChannelResponse {
    fn from(payload: FallbackPayload) -> Self {
        ChannelResponse {
            code: payload.code,
            reason: payload.reason,
            headers: payload.headers,
            body: payload.body.unwrap_or_default(),
        }
    }
}

/// Builds the loader URL for `request`, appending the callback expression
/// and the folded method, headers, and body.
pub fn fallback_url(request: &ChannelRequest, callback_expression: &str) -> Result<String> {
    let mut url = Url::parse(&request.url).map_err(|source| EngineError::Url {
        url: request.url.clone(),
        source,
    })?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair(CALLBACK_PARAM, callback_expression);
        if !request.method.eq_ignore_ascii_case("GET") {
            query.append_pair(METHOD_PARAM, &request.method);
        }
        if !request.headers.is_empty() {
            let headers = serde_json::to_string(&request.headers)
                .map_err(|err| EngineError::Decode(format!("headers not encodable: {err}")))?;
            query.append_pair(HEADERS_PARAM, &headers);
        }
        if let Some(body) = request.body.as_deref().filter(|body| !body.is_empty()) {
            query.append_pair(BODY_PARAM, body);
        }
    }
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn request(method: &str, url: &str) -> ChannelRequest {
        ChannelRequest {
            method: method.to_owned(),
            url: url.to_owned(),
            headers: Headers::new(),
            body: None,
            credentialed: false,
        }
    }

    fn query(url: &str) -> HashMap<String, String> {
        Url::parse(url)
            .expect("valid url")
            .query_pairs()
            .into_owned()
            .collect()
    }

    #[test]
    fn get_without_extras_only_carries_callback() {
        let url = fallback_url(&request("GET", "https://poll.example/events"), "cb(\"1\")")
            .expect("must build");
        let params = query(&url);
        assert_eq!(params.len(), 1);
        assert_eq!(params[CALLBACK_PARAM], "cb(\"1\")");
    }

    #[test]
    fn method_headers_and_body_are_folded() {
        let mut req = request("POST", "https://poll.example/events?since=5");
        req.headers.insert("X-Token".to_owned(), "abc".to_owned());
        req.body = Some("a=1&b=2".to_owned());

        let url = fallback_url(&req, "cb").expect("must build");
        let params = query(&url);

        assert_eq!(params["since"], "5");
        assert_eq!(params[METHOD_PARAM], "POST");
        assert_eq!(params[HEADERS_PARAM], r#"{"X-Token":"abc"}"#);
        assert_eq!(params[BODY_PARAM], "a=1&b=2");
    }

    #[test]
    fn relative_target_is_rejected() {
        assert!(matches!(
            fallback_url(&request("GET", "/events"), "cb"),
            Err(EngineError::Url { .. })
        ));
    }

    #[test]
    fn payload_fields_are_optional() {
        let payload: FallbackPayload = serde_json::from_str("{}").expect("must decode");
        let response = ChannelResponse::from(payload);
        assert_eq!(response.code, 0);
        assert!(response.body.is_empty());

        let payload: FallbackPayload = serde_json::from_str(
            r#"{"code":200,"reason":"OK","headers":{"ETag":"x"},"body":"{}"}"#,
        )
        .expect("must decode");
        let response = ChannelResponse::from(payload);
        assert_eq!(response.code, 200);
        assert_eq!(response.reason.as_deref(), Some("OK"));
        assert_eq!(response.headers["ETag"], "x");
        assert_eq!(response.body, "{}");
    }
}
