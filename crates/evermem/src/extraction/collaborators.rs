//! LLM and embedding collaborator abstractions (spec §6). Both collaborators
//! are external, out-of-scope black boxes; this module only defines the trait
//! seam and an HTTP-backed implementation, grounded on the teacher's
//! `LLMWorker` reqwest client (retry/backoff loop, JSON body, deadline via
//! `tokio::time::timeout`).

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::warn;

use crate::errors::{MemoryError, MemoryResult};

/// `generate(prompt, temperature, deadline) -> text`. A pure text function;
/// retry/backoff and structured-output parsing live in the pipeline, not here.
#[async_trait]
pub trait LlmCollaborator: Send + Sync {
    async fn generate(&self, prompt: &str, temperature: f32, deadline: Duration) -> MemoryResult<String>;
}

/// `embeddings(texts, is_query) -> vectors`. `is_query=true` prepends an
/// instruction prefix for asymmetric retrieval (spec §6).
#[async_trait]
pub trait EmbeddingCollaborator: Send + Sync {
    async fn embeddings(&self, texts: &[String], is_query: bool) -> MemoryResult<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;
}

/// reqwest-backed LLM collaborator, grounded on the teacher's `LLMWorker`.
pub struct HttpLlmCollaborator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLlmCollaborator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(serde::Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    temperature: f32,
}

#[derive(serde::Deserialize)]
struct GenerateResponse {
    text: String,
}

#[async_trait]
impl LlmCollaborator for HttpLlmCollaborator {
    async fn generate(&self, prompt: &str, temperature: f32, deadline: Duration) -> MemoryResult<String> {
        let url = format!("{}/generate", self.base_url);
        let request = self.client.post(&url).json(&GenerateRequest { prompt, temperature }).send();
        match timeout(deadline, request).await {
            Ok(Ok(resp)) => resp
                .json::<GenerateResponse>()
                .await
                .map(|body| body.text)
                .map_err(|e| MemoryError::ExtractionFailed(format!("malformed LLM response: {e}"))),
            Ok(Err(e)) => Err(MemoryError::ExtractionFailed(format!("LLM request failed: {e}"))),
            Err(_) => Err(MemoryError::DeadlineExceeded),
        }
    }
}

#[derive(serde::Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
    is_query: bool,
}

#[derive(serde::Deserialize)]
struct EmbedResponse {
    vectors: Vec<Vec<f32>>,
}

/// reqwest-backed embedding collaborator with batching and bounded concurrency
/// applied by the caller (see [`super::pipeline::embed_atomic_facts`]); this
/// type itself issues one HTTP call per batch.
pub struct HttpEmbeddingCollaborator {
    client: reqwest::Client,
    base_url: String,
    dim: usize,
}

impl HttpEmbeddingCollaborator {
    pub fn new(base_url: impl Into<String>, dim: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            dim,
        }
    }
}

#[async_trait]
impl EmbeddingCollaborator for HttpEmbeddingCollaborator {
    async fn embeddings(&self, texts: &[String], is_query: bool) -> MemoryResult<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&EmbedRequest { texts, is_query })
            .send()
            .await
            .map_err(|e| MemoryError::ExtractionFailed(format!("embedding request failed: {e}")))?;
        let body: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| MemoryError::ExtractionFailed(format!("malformed embedding response: {e}")))?;

        // Over-sized models: client-side head-slice truncation, no renormalization (spec §6).
        let vectors = body
            .vectors
            .into_iter()
            .map(|v| {
                if v.len() > self.dim {
                    warn!(got = v.len(), want = self.dim, "truncating oversized embedding");
                    v.into_iter().take(self.dim).collect()
                } else {
                    v
                }
            })
            .collect();
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

/// Runs `embed` over `texts` in batches of `batch_size` with at most
/// `concurrency` batches in flight and 3-attempt exponential backoff
/// (base `retry_base`), per spec §4.C4/§5.
pub async fn embed_batched(
    collaborator: &dyn EmbeddingCollaborator,
    texts: &[String],
    is_query: bool,
    batch_size: usize,
    concurrency: usize,
    retry_attempts: u32,
    retry_base: Duration,
) -> MemoryResult<Vec<Vec<f32>>> {
    use futures::stream::{self, StreamExt};

    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let batches: Vec<Vec<String>> = texts
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect();

    let results: Vec<MemoryResult<Vec<Vec<f32>>>> = stream::iter(batches)
        .map(|batch| async move {
            let mut attempt = 0;
            loop {
                match collaborator.embeddings(&batch, is_query).await {
                    Ok(vectors) => return Ok(vectors),
                    Err(e) if attempt + 1 < retry_attempts => {
                        attempt += 1;
                        // Full jitter (AWS retry guidance): uniform(0, base * 2^n) spreads
                        // out a batch of concurrently-retrying callers instead of having
                        // them all wake up on the same tick.
                        let cap = retry_base * 2u32.pow(attempt - 1);
                        let backoff = cap.mul_f64(rand::random::<f64>());
                        warn!(attempt, error = %e, "embedding batch failed, retrying");
                        tokio::time::sleep(backoff).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut out = Vec::with_capacity(texts.len());
    for batch_result in results {
        out.extend(batch_result?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FlakyEmbedder {
        dim: usize,
        failures_remaining: std::sync::Mutex<usize>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingCollaborator for FlakyEmbedder {
        async fn embeddings(&self, texts: &[String], _is_query: bool) -> MemoryResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut remaining = self.failures_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(MemoryError::ExtractionFailed("simulated".to_string()));
            }
            Ok(texts.iter().map(|_| vec![0.0; self.dim]).collect())
        }

        fn dimension(&self) -> usize {
            self.dim
        }
    }

    #[tokio::test]
    async fn embed_batched_retries_then_succeeds() {
        let embedder = Arc::new(FlakyEmbedder {
            dim: 4,
            failures_remaining: std::sync::Mutex::new(1),
            calls: AtomicUsize::new(0),
        });
        let texts = vec!["a".to_string(), "b".to_string()];
        let result = embed_batched(
            embedder.as_ref(),
            &texts,
            false,
            10,
            1,
            3,
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        assert_eq!(result.len(), 2);
        assert!(embedder.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn http_llm_collaborator_parses_a_real_response_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/generate")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"text": "a trip to Chengdu"}"#)
            .create_async()
            .await;

        let collaborator = HttpLlmCollaborator::new(server.url());
        let text = collaborator
            .generate("summarize this", 0.2, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(text, "a trip to Chengdu");
    }

    #[tokio::test]
    async fn http_llm_collaborator_surfaces_deadline_exceeded_on_timeout() {
        // A listener that accepts the connection and never writes a response,
        // so the request is still in flight when the deadline fires.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let collaborator = HttpLlmCollaborator::new(format!("http://{addr}"));
        let result = collaborator
            .generate("summarize this", 0.2, Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(MemoryError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn http_embedding_collaborator_truncates_oversized_vectors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"vectors": [[1.0, 2.0, 3.0, 4.0]]}"#)
            .create_async()
            .await;

        let collaborator = HttpEmbeddingCollaborator::new(server.url(), 2);
        let vectors = collaborator
            .embeddings(&["hello".to_string()], false)
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 2.0]]);
    }

    #[tokio::test]
    async fn embed_batched_splits_on_batch_size() {
        let embedder = Arc::new(FlakyEmbedder {
            dim: 2,
            failures_remaining: std::sync::Mutex::new(0),
            calls: AtomicUsize::new(0),
        });
        let texts: Vec<String> = (0..5).map(|i| format!("t{i}")).collect();
        let result = embed_batched(embedder.as_ref(), &texts, false, 2, 4, 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(result.len(), 5);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3); // ceil(5/2)
    }
}
