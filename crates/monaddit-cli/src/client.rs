//! Minimal JSON client for the node API

use anyhow::{anyhow, Context};
use serde_json::Value;

pub struct ApiClient {
    base: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<Value> {
        let url = self.url(path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;
        decode(response).await
    }

    pub async fn post(&self, path: &str, body: Value) -> anyhow::Result<Value> {
        let url = self.url(path);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;
        decode(response).await
    }
}

/// Absolute path from raw segments, each percent-encoded
pub fn encoded_path(segments: &[&str]) -> anyhow::Result<String> {
    let mut url = reqwest::Url::parse("http://localhost/")?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("cannot build a request path"))?
        .clear()
        .extend(segments);
    Ok(url.path().to_string())
}

async fn decode(response: reqwest::Response) -> anyhow::Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.context("response is not JSON")?;
    if status.is_success() {
        return Ok(body);
    }
    Err(anyhow!(describe_error(status.as_u16(), &body)))
}

/// One-line summary of an API error body
pub fn describe_error(status: u16, body: &Value) -> String {
    let error = &body["error"];
    match (error["code"].as_str(), error["message"].as_str()) {
        (Some(code), Some(message)) => {
            let hint = if error["retryable"].as_bool() == Some(true) {
                " [retryable]"
            } else {
                ""
            };
            format!("{code}: {message}{hint}")
        }
        _ => format!("HTTP {status}: {body}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_url_join() {
        let client = ApiClient::new("http://127.0.0.1:8080/");
        assert_eq!(client.url("/stats"), "http://127.0.0.1:8080/stats");
        assert_eq!(client.url("bond/3"), "http://127.0.0.1:8080/bond/3");
    }

    #[test]
    fn test_encoded_path() {
        assert_eq!(encoded_path(&["content", "abc-123"]).unwrap(), "/content/abc-123");
        assert_eq!(
            encoded_path(&["content", "a/b?c#d"]).unwrap(),
            "/content/a%2Fb%3Fc%23d"
        );
        assert_eq!(encoded_path(&["content", "two words"]).unwrap(), "/content/two%20words");
    }

    #[test]
    fn test_describe_error() {
        let body = json!({ "error": { "code": "BUSY", "message": "bond 1 is busy, retry later", "retryable": true } });
        assert_eq!(describe_error(503, &body), "BUSY: bond 1 is busy, retry later [retryable]");

        let body = json!({ "error": { "code": "NOT_FOUND", "message": "bond not found: 9", "retryable": false } });
        assert_eq!(describe_error(404, &body), "NOT_FOUND: bond not found: 9");

        assert_eq!(describe_error(502, &json!("gateway")), "HTTP 502: \"gateway\"");
    }
}
