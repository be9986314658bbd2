use crate::core::callbacks::CallbackToken;
use crate::error::TransportError;
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Builds the ureq agent every leaderboard request goes through.
pub fn get_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

pub fn cache_buster() -> String {
    Utc::now().timestamp_millis().to_string()
}

/// `{endpoint}?callback={token}&{params..}&_={cache_buster}`
pub fn callback_url(
    endpoint: &Url,
    token: &CallbackToken,
    params: &[(&str, String)],
    cache_buster: &str,
) -> Url {
    let mut url = endpoint.clone();
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("callback", token.as_str());
        for (key, value) in params {
            query.append_pair(key, value);
        }
        query.append_pair("_", cache_buster);
    }
    url
}

/// Extracts the payload from a `token(...)` callback body.
pub fn unwrap_jsonp(body: &str, token: &str) -> Result<Value, TransportError> {
    let mut text = body.trim();
    text = text.strip_prefix("/**/").unwrap_or(text).trim_start();
    text = text.strip_suffix(';').unwrap_or(text).trim_end();

    let Some(args) = text.strip_prefix(token) else {
        return Err(TransportError::ScriptError(format!(
            "response does not invoke callback '{}'",
            token
        )));
    };
    let inner = args
        .trim_start()
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| TransportError::ParseError("malformed callback invocation".into()))?;

    serde_json::from_str(inner).map_err(|e| TransportError::ParseError(e.to_string()))
}

pub fn map_ureq_error(err: ureq::Error, timeout: Duration) -> TransportError {
    match err {
        ureq::Error::StatusCode(code) => TransportError::HttpError(format!("status {}", code)),
        ureq::Error::Timeout(_) => TransportError::timed_out(timeout),
        ureq::Error::Json(e) => TransportError::ParseError(e.to_string()),
        other => TransportError::HttpError(other.to_string()),
    }
}
