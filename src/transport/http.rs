//! HTTP transport over reqwest

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;

use super::{Method, Transport, TransportError};
use crate::config::Config;

const PROJECT_HEADER: &str = "x-appwrite-project";
const KEY_HEADER: &str = "x-appwrite-key";

/// Authenticated client for the management API
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
}

impl HttpTransport {
    /// Build a transport that sends the project id and API key on every call
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        Self::with_client_builder(config, reqwest::Client::builder())
    }

    fn with_client_builder(
        config: &Config,
        builder: reqwest::ClientBuilder,
    ) -> Result<Self, TransportError> {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static(PROJECT_HEADER),
            header_value(&endpoint, &config.project_id)?,
        );
        let mut key = header_value(&endpoint, &config.api_key)?;
        key.set_sensitive(true);
        headers.insert(HeaderName::from_static(KEY_HEADER), key);

        let client = builder
            .build()
            .map_err(|e| TransportError::Request {
                url: endpoint.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint,
            headers,
        })
    }

    /// Base URL every path is appended to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn header_value(endpoint: &str, value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value).map_err(|e| TransportError::Request {
        url: endpoint.to_string(),
        message: format!("invalid header value: {}", e),
    })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, TransportError> {
        let url = format!("{}{}", self.endpoint, path);
        tracing::debug!("Request URL: {} {}", method, url);

        let mut request = self
            .client
            .request(method, &url)
            .headers(self.headers.clone());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| TransportError::Request {
            url: url.clone(),
            message: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| TransportError::Request {
            url: url.clone(),
            message: format!("failed to read response body: {}", e),
        })?;
        tracing::debug!("Raw Response: {}", text);

        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body: text,
            });
        }

        // 204 and friends
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| TransportError::Decode {
            message: e.to_string(),
            body: text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn config(endpoint: &str, key: &str) -> Config {
        Config {
            endpoint: endpoint.to_string(),
            project_id: "portfolio".to_string(),
            database_id: "site".to_string(),
            api_key: key.to_string(),
        }
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let transport = HttpTransport::new(&config("https://backend.example/v1/", "k")).unwrap();
        assert_eq!(transport.endpoint(), "https://backend.example/v1");
        assert!(transport.headers.get(KEY_HEADER).unwrap().is_sensitive());
        assert_eq!(
            transport.headers.get(PROJECT_HEADER).unwrap(),
            "portfolio"
        );
    }

    #[test]
    fn test_invalid_header_value_rejected() {
        let err = HttpTransport::new(&config("https://backend.example/v1", "bad\nkey"))
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Request { .. }));
    }

    fn response(status_line: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        )
    }

    /// Headers received and body length announced, once both are in
    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..header_end]
            .lines()
            .find_map(|line| {
                line.to_ascii_lowercase()
                    .strip_prefix("content-length:")
                    .and_then(|v| v.trim().parse::<usize>().ok())
            })
            .unwrap_or(0);
        raw.len() >= header_end + 4 + length
    }

    /// Answer a single connection with `reply`; the handle yields the raw request
    async fn serve_once(reply: String) -> (HttpTransport, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/v1", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request_complete(&request) {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        let transport = HttpTransport::with_client_builder(
            &config(&endpoint, "secret"),
            reqwest::Client::builder().no_proxy(),
        )
        .unwrap();
        (transport, server)
    }

    #[tokio::test]
    async fn test_request_sends_headers_and_body() {
        let (transport, server) =
            serve_once(response("201 Created", r#"{"$id":"about","name":"About"}"#)).await;

        let value = transport
            .request(
                Method::POST,
                "/databases/site/collections",
                Some(&json!({"collectionId": "about"})),
            )
            .await
            .unwrap();
        assert_eq!(value["$id"], "about");

        let raw = server.await.unwrap();
        let lower = raw.to_ascii_lowercase();
        assert!(raw.starts_with("POST /v1/databases/site/collections HTTP/1.1"));
        assert!(lower.contains("x-appwrite-project: portfolio"));
        assert!(lower.contains("x-appwrite-key: secret"));
        assert!(lower.contains("content-type: application/json"));
        assert!(raw.ends_with(r#"{"collectionId":"about"}"#));
    }

    #[tokio::test]
    async fn test_error_status_keeps_raw_body() {
        let body = r#"{"message":"Collection with the requested ID could not be found.","code":404,"type":"collection_not_found"}"#;
        let (transport, server) = serve_once(response("404 Not Found", body)).await;

        let err = transport
            .request(Method::GET, "/databases/site/collections/about", None)
            .await
            .unwrap_err();
        server.await.unwrap();

        match err {
            TransportError::Http {
                status,
                status_text,
                body: raw,
            } => {
                assert_eq!(status, 404);
                assert_eq!(status_text, "Not Found");
                assert_eq!(raw, body);
            }
            other => panic!("Expected HTTP error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unparsable_success_body_is_decode_error() {
        let (transport, server) = serve_once(response("200 OK", "not json")).await;

        let err = transport
            .request(Method::GET, "/databases/site/collections/about", None)
            .await
            .unwrap_err();
        server.await.unwrap();

        assert!(matches!(err, TransportError::Decode { ref body, .. } if body == "not json"));
        assert_eq!(err.body(), Some("not json"));
    }

    #[tokio::test]
    async fn test_empty_success_body_is_null() {
        let (transport, server) =
            serve_once("HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n".to_string())
                .await;

        let value = transport
            .request(Method::PATCH, "/databases/site/collections/about/documents/a", None)
            .await
            .unwrap();
        server.await.unwrap();

        assert_eq!(value, Value::Null);
    }
}
