//! Embedding service trait and implementations.
//!
//! - `OpenAiEmbeddingService` calls an OpenAI-compatible `/embeddings`
//!   endpoint over HTTP. This is the production embedding backend.
//! - `UnavailableEmbedding` stands in when no credential is configured, so
//!   search can still degrade to the lexical tiers.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use shelf_core::config::EmbeddingConfig;
use shelf_core::error::ShelfError;

/// Service for generating text embeddings.
///
/// Implementations never retry; retry and fallback policy belongs to the
/// caller.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given non-empty text.
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, ShelfError>> + Send;

    /// Whether a provider credential is available at all.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// Because `EmbeddingService::embed` returns `impl Future` it is not
/// object-safe. This trait uses a boxed future instead, allowing
/// `Arc<dyn DynEmbeddingService>` to be shared between the orchestrator and
/// the sync pipeline.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, ShelfError>> + Send + 'a>>;

    fn is_configured(&self) -> bool;
}

/// Blanket impl: any `EmbeddingService` automatically implements `DynEmbeddingService`.
impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, ShelfError>> + Send + 'a>>
    {
        Box::pin(self.embed(text))
    }

    fn is_configured(&self) -> bool {
        EmbeddingService::is_configured(self)
    }
}

// ---------------------------------------------------------------------------
// OpenAiEmbeddingService - HTTP provider
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    encoding_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Extract the first embedding from a provider response body.
fn parse_embedding_response(body: &str) -> Result<Vec<f32>, ShelfError> {
    let response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| ShelfError::Provider(format!("Malformed embedding response: {}", e)))?;

    let embedding = response
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| ShelfError::Provider("Embedding response contained no data".to_string()))?;

    if embedding.is_empty() {
        return Err(ShelfError::Provider("Provider returned an empty embedding".to_string()));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(ShelfError::Provider(
            "Provider returned a non-finite embedding value".to_string(),
        ));
    }
    Ok(embedding)
}

/// Embedding service backed by an OpenAI-compatible HTTP endpoint.
pub struct OpenAiEmbeddingService {
    client: reqwest::Client,
    api_url: String,
    model: String,
    encoding_format: String,
    api_key: String,
}

impl std::fmt::Debug for OpenAiEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddingService")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiEmbeddingService {
    /// Build the service from configuration.
    ///
    /// Fails with [`ShelfError::Config`] when no credential can be resolved.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, ShelfError> {
        let api_key = config.resolve_api_key().ok_or_else(|| {
            ShelfError::Config(format!(
                "No embedding provider credential: set embedding.api_key or {}",
                config.api_key_env
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ShelfError::Config(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            api_url = %config.api_url,
            model = %config.model,
            "Embedding provider configured"
        );

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            encoding_format: config.encoding_format.clone(),
            api_key,
        })
    }
}

impl EmbeddingService for OpenAiEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ShelfError> {
        if text.trim().is_empty() {
            return Err(ShelfError::Provider("Cannot embed empty text".to_string()));
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
            encoding_format: &self.encoding_format,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ShelfError::Provider(format!("Embedding request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ShelfError::Provider(format!("Failed to read embedding response: {}", e)))?;

        if !status.is_success() {
            let snippet: String = body.chars().take(200).collect();
            return Err(ShelfError::Provider(format!("HTTP {}: {}", status, snippet)));
        }

        let embedding = parse_embedding_response(&body)?;
        debug!(dimensions = embedding.len(), "Embedding generated");
        Ok(embedding)
    }
}

// ---------------------------------------------------------------------------
// UnavailableEmbedding - no credential configured
// ---------------------------------------------------------------------------

/// Placeholder used when the provider could not be configured at startup.
///
/// Every call fails with [`ShelfError::Config`], so a sync aborts while a
/// search falls through to the tiers that need no vector.
#[derive(Debug, Clone)]
pub struct UnavailableEmbedding {
    reason: String,
}

impl UnavailableEmbedding {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl EmbeddingService for UnavailableEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ShelfError> {
        Err(ShelfError::Config(self.reason.clone()))
    }

    fn is_configured(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock embedding service that returns deterministic 384-dimensional vectors.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce identical outputs and unrelated inputs are nearly
/// orthogonal. Texts registered with [`MockEmbedding::failing_on`] return a
/// provider error instead.
#[derive(Debug, Clone, Default)]
pub struct MockEmbedding {
    fail_on: Arc<HashSet<String>>,
    calls: Arc<AtomicUsize>,
}

impl MockEmbedding {
    pub const DIMENSIONS: usize = 384;

    pub fn new() -> Self {
        Self::default()
    }

    /// A mock that fails for exactly the given input texts.
    pub fn failing_on<I, T>(texts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            fail_on: Arc::new(texts.into_iter().map(Into::into).collect()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of `embed` calls made so far, across clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn hash_to_vector(text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(Self::DIMENSIONS);
        for i in 0..Self::DIMENSIONS {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ShelfError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.is_empty() {
            return Err(ShelfError::Provider("Cannot embed empty text".to_string()));
        }
        if self.fail_on.contains(text) {
            return Err(ShelfError::Provider(format!(
                "Mock provider failure for {:?}",
                text
            )));
        }
        Ok(Self::hash_to_vector(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_core::similarity::cosine_similarity;

    #[tokio::test]
    async fn test_mock_embedding_dimension() {
        let service = MockEmbedding::new();
        let vec = service.embed("hello world").await.unwrap();
        assert_eq!(vec.len(), MockEmbedding::DIMENSIONS);
    }

    #[tokio::test]
    async fn test_mock_embedding_deterministic() {
        let service = MockEmbedding::new();
        let v1 = service.embed("same text").await.unwrap();
        let v2 = service.embed("same text").await.unwrap();
        assert_eq!(v1, v2);
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_embedding_unrelated_inputs_are_dissimilar() {
        let service = MockEmbedding::new();
        let v1 = service.embed("mozzarella").await.unwrap();
        let v2 = service.embed("Fior di Latte Mozzarella").await.unwrap();
        assert!(cosine_similarity(&v1, &v2) < 0.3);
    }

    #[tokio::test]
    async fn test_mock_embedding_empty_text() {
        let service = MockEmbedding::new();
        assert!(service.embed("").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_embedding_failing_on() {
        let service = MockEmbedding::failing_on(["broken"]);
        assert!(matches!(
            service.embed("broken").await,
            Err(ShelfError::Provider(_))
        ));
        assert!(service.embed("fine").await.is_ok());
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_embedding_is_config_error() {
        let service = UnavailableEmbedding::new("no key");
        assert!(!EmbeddingService::is_configured(&service));
        assert!(matches!(
            service.embed("anything").await,
            Err(ShelfError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_dyn_dispatch() {
        let service: Arc<dyn DynEmbeddingService> = Arc::new(MockEmbedding::new());
        assert!(service.is_configured());
        let v = service.embed_boxed("boxed").await.unwrap();
        assert_eq!(v, MockEmbedding::hash_to_vector("boxed"));
    }

    #[test]
    fn test_parse_embedding_response() {
        let body = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.1,-0.2,0.3]}],"model":"m"}"#;
        assert_eq!(parse_embedding_response(body).unwrap(), vec![0.1, -0.2, 0.3]);
    }

    #[test]
    fn test_parse_embedding_response_errors() {
        for body in [
            "not json",
            r#"{"data": []}"#,
            r#"{"data": [{"embedding": []}]}"#,
            r#"{"error": {"message": "bad"}}"#,
        ] {
            assert!(
                matches!(parse_embedding_response(body), Err(ShelfError::Provider(_))),
                "expected provider error for {}",
                body
            );
        }
    }

    #[test]
    fn test_request_shape() {
        let request = EmbeddingRequest {
            model: "text-embedding-3-small",
            input: "Grana Padano DOP",
            encoding_format: "float",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "text-embedding-3-small");
        assert_eq!(json["input"], "Grana Padano DOP");
        assert_eq!(json["encoding_format"], "float");
    }

    #[test]
    fn test_openai_requires_credential() {
        let config = EmbeddingConfig {
            api_key: None,
            api_key_env: "SHELF_TEST_DEFINITELY_UNSET_KEY_VAR".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            OpenAiEmbeddingService::from_config(&config),
            Err(ShelfError::Config(_))
        ));
    }

    #[test]
    fn test_openai_builds_with_credential() {
        let config = EmbeddingConfig {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        let service = OpenAiEmbeddingService::from_config(&config).unwrap();
        assert!(EmbeddingService::is_configured(&service));
        assert!(!format!("{:?}", service).contains("sk-test"));
    }
}
