//! HTTP client for the `/api/v1` job endpoints.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, ETAG, HeaderMap, HeaderValue, IF_MATCH, USER_AGENT};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("invalid API url: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid token")]
    Token,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// A JSON body together with the `ETag` header of the response.
#[derive(Debug)]
pub struct Tagged {
    pub body: Value,
    pub etag: Option<String>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(api_url: &str, token: &str) -> ClientResult<Self> {
        let mut base = Url::parse(api_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        let bearer =
            HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| ClientError::Token)?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("dcictl/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert(
            "client-version",
            HeaderValue::from_static(concat!("dcictl_", env!("CARGO_PKG_VERSION"))),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        Ok(Self { http, base })
    }

    /// Resolve `path` relative to `<base>/api/v1/`.
    pub fn endpoint(&self, path: &str) -> ClientResult<Url> {
        Ok(self.base.join("api/v1/")?.join(path.trim_start_matches('/'))?)
    }

    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> ClientResult<Tagged> {
        let url = self.endpoint(path)?;
        let response = self.send(self.http.get(url).query(query)).await?;
        tagged(response).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ClientResult<Tagged> {
        let url = self.endpoint(path)?;
        let response = self.send(self.http.post(url).json(body)).await?;
        tagged(response).await
    }

    /// PUT `body` guarded by `etag`; returns the new etag.
    pub async fn put<B: Serialize + ?Sized>(
        &self,
        path: &str,
        etag: &str,
        body: &B,
    ) -> ClientResult<Option<String>> {
        let url = self.endpoint(path)?;
        let response = self
            .send(self.http.put(url).header(IF_MATCH, etag).json(body))
            .await?;
        Ok(etag_of(&response))
    }

    pub async fn upload(
        &self,
        path: &str,
        name: &str,
        mime: &str,
        content: Vec<u8>,
    ) -> ClientResult<Tagged> {
        let url = self.endpoint(path)?;
        let request = self
            .http
            .post(url)
            .header("dci-name", name)
            .header(CONTENT_TYPE, mime)
            .body(content);
        let response = self.send(request).await?;
        tagged(response).await
    }

    async fn send(&self, request: RequestBuilder) -> ClientResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!(url = %response.url(), status = %status, "response");
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(ClientError::Api {
            status,
            message: error_message(&text),
        })
    }
}

fn etag_of(response: &Response) -> Option<String> {
    response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn tagged(response: Response) -> ClientResult<Tagged> {
    let etag = etag_of(&response);
    let body = if response.status() == StatusCode::NO_CONTENT {
        Value::Null
    } else {
        response.json().await?
    };
    Ok(Tagged { body, etag })
}

/// Extract `message` from an API error body, falling back to the raw text.
fn error_message(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|body| {
            let message = body.get("message")?.as_str()?.to_string();
            Some(match body.get("payload") {
                Some(payload) => format!("{} ({})", message, payload),
                None => message,
            })
        })
        .unwrap_or_else(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = ApiClient::new("http://dci.example.com/dci", "token").unwrap();
        assert_eq!(
            client.endpoint("jobs/schedule").unwrap().as_str(),
            "http://dci.example.com/dci/api/v1/jobs/schedule"
        );

        let client = ApiClient::new("http://localhost:5000", "token").unwrap();
        assert_eq!(
            client.endpoint("/jobs").unwrap().as_str(),
            "http://localhost:5000/api/v1/jobs"
        );
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            ApiClient::new("not a url", "token"),
            Err(ClientError::Url(_))
        ));
    }

    #[test]
    fn test_error_message() {
        let body = r#"{"status_code":400,"message":"Invalid where key: \"id\"","payload":{"error":"bad"}}"#;
        assert_eq!(
            error_message(body),
            r#"Invalid where key: "id" ({"error":"bad"})"#
        );
        assert_eq!(
            error_message(r#"{"status_code":401,"message":"Unauthorized"}"#),
            "Unauthorized"
        );
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }
}
