/// Remote embedding server client
use crate::{ClientError, Result};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use text_similarity_backend_core::{Embedding, EmbeddingApi};
use tracing::instrument;

#[derive(Serialize)]
struct TeiEmbedRequest<'a> {
    inputs: &'a [String],
    normalize: bool,
    truncate: bool,
}

#[derive(Serialize)]
struct OpenAiEmbedRequest<'a> {
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
pub(crate) struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    embedding: Embedding,
    index: usize,
}

impl OpenAiEmbedResponse {
    /// Servers are allowed to answer out of order: `index` is authoritative and must cover
    /// `0..data.len()` exactly once
    pub(crate) fn into_embeddings(self) -> Result<Vec<Embedding>> {
        let mut data = self.data;
        data.sort_by_key(|d| d.index);
        if let Some((position, d)) = data.iter().enumerate().find(|(i, d)| *i != d.index) {
            return Err(ClientError::Decode(format!(
                "expected embedding index {position}, got {}",
                d.index
            )));
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Async client for a single embedding server
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
    api: EmbeddingApi,
    model: Option<String>,
    api_token: Option<String>,
    truncate: bool,
}

impl Client {
    pub fn new(
        base_url: &str,
        api: EmbeddingApi,
        model: Option<String>,
        api_token: Option<String>,
        truncate: bool,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        // Routes are joined relative to the base, which must end with a slash
        let mut normalized = base_url.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized)
            .map_err(|err| ClientError::Connection(format!("invalid url `{base_url}`: {err}")))?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            base_url,
            api,
            model,
            api_token,
            truncate,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|err| ClientError::Connection(err.to_string()))
    }

    fn post(&self, path: &str) -> Result<reqwest::RequestBuilder> {
        let request = self.http.post(self.url(path)?);
        Ok(match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    /// Get server health
    #[instrument(skip(self))]
    pub async fn health(&self) -> Result<()> {
        match self.api {
            EmbeddingApi::Tei => {
                let response = self.http.get(self.url("health")?).send().await?;
                check_status(response).await.map(|_| ())
            }
            // No standard health route: embed a single short string instead
            EmbeddingApi::OpenAi => self.embed(&["health".to_string()]).await.map(|_| ()),
        }
    }

    #[instrument(skip_all, fields(inputs = inputs.len()))]
    pub async fn embed(&self, inputs: &[String]) -> Result<Vec<Embedding>> {
        match self.api {
            EmbeddingApi::Tei => {
                let request = TeiEmbedRequest {
                    inputs,
                    normalize: false,
                    truncate: self.truncate,
                };
                let response = self.post("embed")?.json(&request).send().await?;
                Ok(check_status(response).await?.json::<Vec<Embedding>>().await?)
            }
            EmbeddingApi::OpenAi => {
                let request = OpenAiEmbedRequest {
                    input: inputs,
                    model: self.model.as_deref(),
                };
                let response = self.post("v1/embeddings")?.json(&request).send().await?;
                let response = check_status(response)
                    .await?
                    .json::<OpenAiEmbedResponse>()
                    .await?;
                response.into_embeddings()
            }
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Server(status_message(status, &body)))
}

fn status_message(status: StatusCode, body: &str) -> String {
    if body.is_empty() {
        format!("embedding server returned {status}")
    } else {
        format!("embedding server returned {status}: {body}")
    }
}
