//! HTTP JSON adapters for the four ports.
//!
//! Each adapter wraps one backend service behind a base URL and maps its
//! wire behavior onto the [`PortError`] taxonomy: request timeouts to
//! `Timeout`, 429 (honoring `Retry-After`) to `RateLimited`, undecodable
//! bodies and out-of-set labels to `MalformedResponse`, everything else
//! non-2xx to `Unavailable`. Retry and rate gating live in the engine,
//! not here.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::domain::{
    Classification, ContextPassage, ContextSet, Dimension, GenerationResult, TicketDraft, TicketId,
};
use crate::ports::{ClassificationPort, GenerationPort, PortError, RetrievalPort, TicketSink};

/// Whether a backend answers on `GET {base_url}/health`.
pub async fn check_endpoint(client: &reqwest::Client, base_url: &str) -> bool {
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    match client
        .get(&url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

fn parse_retry_after(header: Option<&str>) -> Option<Duration> {
    header
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

async fn post_json<Req, Resp>(
    client: &reqwest::Client,
    url: &str,
    body: &Req,
    idempotency_key: Option<&str>,
) -> Result<Resp, PortError>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let mut request = client.post(url).json(body);
    if let Some(key) = idempotency_key {
        request = request.header("Idempotency-Key", key);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            PortError::Timeout
        } else {
            PortError::unavailable(e.to_string())
        }
    })?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = parse_retry_after(
            response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        return Err(PortError::RateLimited { retry_after });
    }
    if status == reqwest::StatusCode::REQUEST_TIMEOUT {
        return Err(PortError::Timeout);
    }
    if !status.is_success() {
        return Err(PortError::unavailable(format!("{url} returned {status}")));
    }

    response
        .json::<Resp>()
        .await
        .map_err(|e| PortError::malformed(e.to_string()))
}

// ── Retrieval ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    k: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    passages: Vec<ContextPassage>,
}

/// Vector-search backend adapter (`POST {base}/search`).
pub struct HttpRetrievalPort {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRetrievalPort {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RetrievalPort for HttpRetrievalPort {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ContextPassage>, PortError> {
        let url = format!("{}/search", self.base_url);
        let resp: SearchResponse =
            post_json(&self.client, &url, &SearchRequest { query, k }, None).await?;
        Ok(resp.passages)
    }
}

// ── Classification ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
    dimension: Dimension,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    label: String,
    confidence: Option<f64>,
}

fn classification_from_response(
    dimension: Dimension,
    resp: ClassifyResponse,
) -> Result<Classification, PortError> {
    let label = crate::domain::Label::parse(dimension, &resp.label).ok_or_else(|| {
        PortError::malformed(format!(
            "label '{}' not in the {} label set",
            resp.label, dimension
        ))
    })?;
    let mut classification = Classification::new(label);
    if let Some(confidence) = resp.confidence {
        classification = classification.with_confidence(confidence);
    }
    Ok(classification)
}

/// Structured-classifier backend adapter (`POST {base}/classify`).
pub struct HttpClassificationPort {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClassificationPort {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ClassificationPort for HttpClassificationPort {
    async fn classify(
        &self,
        text: &str,
        dimension: Dimension,
    ) -> Result<Classification, PortError> {
        let url = format!("{}/classify", self.base_url);
        let resp: ClassifyResponse =
            post_json(&self.client, &url, &ClassifyRequest { text, dimension }, None).await?;
        classification_from_response(dimension, resp)
    }
}

// ── Generation ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateRequest<'a> {
    query: &'a str,
    passages: &'a [ContextPassage],
}

#[derive(Deserialize)]
struct GenerateResponse {
    answer: Option<String>,
    cited_ids: Option<Vec<String>>,
    refused: Option<String>,
}

fn generation_from_response(resp: GenerateResponse) -> Result<GenerationResult, PortError> {
    if let Some(reason) = resp.refused {
        return Ok(GenerationResult::Refused { reason });
    }
    match resp.answer {
        Some(text) => Ok(GenerationResult::Answered {
            text,
            cited_ids: resp.cited_ids.unwrap_or_default(),
        }),
        None => Err(PortError::malformed(
            "response carries neither an answer nor a refusal",
        )),
    }
}

/// Grounded-answer backend adapter (`POST {base}/generate`).
pub struct HttpGenerationPort {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGenerationPort {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GenerationPort for HttpGenerationPort {
    async fn generate(
        &self,
        query: &str,
        context: &ContextSet,
    ) -> Result<GenerationResult, PortError> {
        let url = format!("{}/generate", self.base_url);
        let resp: GenerateResponse = post_json(
            &self.client,
            &url,
            &GenerateRequest {
                query,
                passages: context.passages(),
            },
            None,
        )
        .await?;
        generation_from_response(resp)
    }
}

// ── Ticket sink ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TicketResponse {
    id: String,
}

/// Ticket-store adapter (`POST {base}/tickets`). The draft's idempotency
/// key rides in the `Idempotency-Key` header so retried creates
/// deduplicate server-side.
pub struct HttpTicketSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTicketSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TicketSink for HttpTicketSink {
    async fn create_ticket(&self, draft: &TicketDraft) -> Result<TicketId, PortError> {
        let url = format!("{}/tickets", self.base_url);
        let resp: TicketResponse =
            post_json(&self.client, &url, draft, Some(&draft.idempotency_key)).await?;
        Ok(TicketId(resp.id))
    }
}
