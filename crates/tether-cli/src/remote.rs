//! HTTP-backed executor and connectivity probe.
//!
//! Actions map onto REST verbs against `{base}/{target}`: create is `POST`,
//! update is `PUT`, delete is `DELETE`, and custom verbs are `POST`ed with an
//! `X-Tether-Action` header. Cache reconciliation reads `GET {base}/{key}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tether_core::util::{compact_text, normalize_text_option};
use tether_core::{
    ActionKind, ActionRequest, ConnectivityProbe, Error, ExecuteResponse, FetchedValue, Payload,
    RemoteExecutor,
};

use crate::error::CliError;

const ACTION_HEADER: &str = "X-Tether-Action";

#[derive(Clone)]
pub struct HttpExecutor {
    base_url: Option<String>,
    client: reqwest::Client,
}

impl HttpExecutor {
    /// Executor for `base_url`. Without a base URL every call fails as
    /// transient, so queued work stays queued.
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self, CliError> {
        Ok(Self {
            base_url: normalize_text_option(base_url)
                .map(|url| url.trim_end_matches('/').to_string()),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    fn url_for(&self, path: &str) -> tether_core::Result<String> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| Error::TransientNetwork("no remote configured".to_string()))?;
        Ok(join_url(base, path))
    }
}

#[async_trait]
impl RemoteExecutor for HttpExecutor {
    async fn execute(&self, request: &ActionRequest) -> tether_core::Result<ExecuteResponse> {
        let url = self.url_for(&request.target)?;
        let method = method_for(&request.kind);
        let mut builder = self
            .client
            .request(method, &url)
            .header("Accept", "application/json");
        if let ActionKind::Custom(verb) = &request.kind {
            builder = builder.header(ACTION_HEADER, verb.as_str());
        }
        builder = match &request.payload {
            Some(Payload::Bytes(bytes)) => builder
                .header("Content-Type", "application/octet-stream")
                .body(bytes.clone()),
            Some(payload) => builder.json(&payload.to_json()),
            None => builder,
        };

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        Ok(parse_execute_body(&body))
    }

    async fn fetch(&self, key: &str) -> tether_core::Result<FetchedValue> {
        let url = self.url_for(key)?;
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        parse_fetch_body(&body)
    }
}

/// Reachability check: any HTTP answer counts as online.
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, CliError> {
        Ok(Self {
            url: url.into(),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_online(&self) -> tether_core::Result<bool> {
        match self.client.head(&self.url).send().await {
            Ok(_) => Ok(true),
            Err(error) if error.is_connect() || error.is_timeout() => Ok(false),
            Err(error) => Err(Error::TransientNetwork(error.to_string())),
        }
    }
}

fn method_for(kind: &ActionKind) -> Method {
    match kind {
        ActionKind::Create | ActionKind::Custom(_) => Method::POST,
        ActionKind::Update => Method::PUT,
        ActionKind::Delete => Method::DELETE,
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn transport_error(error: reqwest::Error) -> Error {
    if error.is_builder() {
        Error::PermanentRejection(format!("invalid request: {error}"))
    } else {
        Error::TransientNetwork(error.to_string())
    }
}

/// 408, 429 and 5xx are worth retrying; any other failure status is final.
fn status_error(status: StatusCode, body: &str) -> Error {
    let message = parse_api_error(status, body);
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        Error::TransientNetwork(message)
    } else {
        Error::PermanentRejection(message)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[derive(Debug, Default, Deserialize)]
struct VersionedBody {
    value: Option<serde_json::Value>,
    version: Option<u64>,
}

/// Bodies that are empty or not `{value, version}` carry no server state.
fn parse_execute_body(body: &str) -> ExecuteResponse {
    if body.trim().is_empty() {
        return ExecuteResponse::default();
    }
    let parsed = serde_json::from_str::<VersionedBody>(body).unwrap_or_default();
    ExecuteResponse {
        value: parsed.value.map(Payload::Json),
        version: parsed.version,
    }
}

fn parse_fetch_body(body: &str) -> tether_core::Result<FetchedValue> {
    let parsed = serde_json::from_str::<VersionedBody>(body)
        .map_err(|error| Error::PermanentRejection(format!("invalid fetch response: {error}")))?;
    let version = parsed.version.ok_or_else(|| {
        Error::PermanentRejection("fetch response did not include version".to_string())
    })?;
    Ok(FetchedValue {
        value: Payload::Json(parsed.value.unwrap_or(serde_json::Value::Null)),
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tether_core::ErrorClass;

    #[test]
    fn verbs_map_to_methods() {
        assert_eq!(method_for(&ActionKind::Create), Method::POST);
        assert_eq!(method_for(&ActionKind::Update), Method::PUT);
        assert_eq!(method_for(&ActionKind::Delete), Method::DELETE);
        assert_eq!(method_for(&ActionKind::Custom("like".into())), Method::POST);
    }

    #[test]
    fn join_url_collapses_slashes() {
        assert_eq!(
            join_url("https://api.example.com/v1/", "/posts/42"),
            "https://api.example.com/v1/posts/42"
        );
    }

    #[test]
    fn retryable_statuses_are_transient() {
        for status in [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert_eq!(status_error(status, "").class(), ErrorClass::Transient);
        }
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::NOT_FOUND,
            StatusCode::UNPROCESSABLE_ENTITY,
        ] {
            assert_eq!(status_error(status, "").class(), ErrorClass::Permanent);
        }
    }

    #[test]
    fn api_error_prefers_message_field() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, r#"{"message":" title missing "}"#),
            "title missing (400)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
    }

    #[test]
    fn execute_body_extracts_version() {
        let response = parse_execute_body(r#"{"value":{"title":"a"},"version":7}"#);
        assert_eq!(response.version, Some(7));
        assert_eq!(response.value, Some(Payload::Json(json!({"title": "a"}))));

        assert_eq!(parse_execute_body(""), ExecuteResponse::default());
        assert_eq!(parse_execute_body("ok"), ExecuteResponse::default());
    }

    #[test]
    fn fetch_body_requires_version() {
        let fetched = parse_fetch_body(r#"{"value":"x","version":3}"#).unwrap();
        assert_eq!(fetched.version, 3);
        assert_eq!(fetched.value, Payload::Json(json!("x")));

        assert!(parse_fetch_body(r#"{"value":"x"}"#).is_err());
    }

    #[tokio::test]
    async fn missing_remote_fails_as_transient() {
        let executor = HttpExecutor::new(None, Duration::from_secs(1)).unwrap();
        let request = ActionRequest {
            kind: ActionKind::Update,
            target: "posts/1".to_string(),
            payload: None,
        };
        let error = executor.execute(&request).await.unwrap_err();
        assert!(error.is_transient());
    }
}
