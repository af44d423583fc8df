use crate::error::{IndexerError, Result};
use crate::stage::StageError;
use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    /// Rate limited, overloaded, or unreachable; try again later.
    #[error("embedding endpoint unavailable: {0}")]
    Unavailable(String),

    #[error("embedding request rejected: {0}")]
    Rejected(String),
}

impl From<EmbeddingError> for StageError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::Unavailable(_) => Self::Transient(err.to_string()),
            EmbeddingError::Rejected(_) => Self::Fatal(err.to_string()),
        }
    }
}

/// Turns text into a vector. Calls are serialized by the pipeline's
/// resource lock, so implementations need not throttle themselves.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError>;
}

/// Location of an OpenAI-compatible embeddings endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct EmbeddingEndpoint {
    /// Full URL of the embeddings route, e.g. `http://localhost:11434/v1/embeddings`.
    pub url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

impl fmt::Debug for EmbeddingEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingEndpoint")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    endpoint: EmbeddingEndpoint,
}

impl HttpEmbeddingClient {
    pub fn new(endpoint: EmbeddingEndpoint, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexerError::Embedding(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }

    #[must_use]
    pub const fn endpoint(&self) -> &EmbeddingEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let body = EmbeddingRequest {
            input: text,
            model: self.endpoint.model.as_deref(),
        };
        let mut request = self.client.post(&self.endpoint.url).json(&body);
        if let Some(key) = &self.endpoint.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                EmbeddingError::Unavailable(e.to_string())
            } else {
                EmbeddingError::Rejected(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let message = format!("{status}: {}", detail.chars().take(200).collect::<String>());
            return Err(classify_status(status, message));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Rejected(format!("malformed response: {e}")))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::Rejected("response carried no embedding".into()))?;
        debug!("Embedded {} chars into {} dims", text.len(), vector.len());
        Ok(vector)
    }
}

fn classify_status(status: StatusCode, message: String) -> EmbeddingError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        EmbeddingError::Unavailable(message)
    } else {
        EmbeddingError::Rejected(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            EmbeddingError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, String::new()),
            EmbeddingError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, String::new()),
            EmbeddingError::Rejected(_)
        ));
    }

    #[test]
    fn debug_redacts_credentials() {
        let endpoint = EmbeddingEndpoint {
            url: "http://localhost/v1/embeddings".into(),
            api_key: Some("sk-secret".into()),
            model: None,
        };
        let shown = format!("{endpoint:?}");
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("<redacted>"));
    }

    #[test]
    fn request_omits_missing_model() {
        let body = EmbeddingRequest {
            input: "hello",
            model: None,
        };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"input":"hello"}"#);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let client = HttpEmbeddingClient::new(
            EmbeddingEndpoint {
                url: "http://127.0.0.1:9/v1/embeddings".into(),
                api_key: None,
                model: None,
            },
            Duration::from_secs(2),
        )
        .unwrap();
        let err = client.embed("text").await.unwrap_err();
        assert!(StageError::from(err).is_transient());
    }
}
