use anyhow::Result;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use text_similarity_backend::EmbeddingApi;
use text_similarity_router::run;
use tokio::time::Instant;

#[derive(Serialize, Deserialize, Debug)]
pub struct Score(pub f32);

impl Score {
    fn is_close(&self, other: &Self, abs_tol: f32) -> bool {
        is_close::default()
            .abs_tol(abs_tol)
            .is_close(self.0, other.0)
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        // Default tolerance for equality
        self.is_close(other, 1e-6)
    }
}

#[derive(Deserialize, Debug)]
pub struct SnapshotMatch {
    pub document: String,
    pub similarity: Score,
}

#[derive(Deserialize, Debug)]
pub struct SnapshotResponse {
    pub best_matches: Vec<SnapshotMatch>,
}

impl SnapshotResponse {
    pub fn ranking(&self) -> Vec<(&str, &Score)> {
        self.best_matches
            .iter()
            .map(|m| (m.document.as_str(), &m.similarity))
            .collect()
    }
}

#[derive(Deserialize, Debug)]
pub struct SnapshotError {
    pub error: String,
    pub error_type: String,
}

fn vector(input: &str) -> Vec<f32> {
    match input {
        "cat" => vec![1.0, 0.0],
        "dog" => vec![0.3, 0.5],
        "car" => vec![0.1, -0.2],
        "x" => vec![0.0, 1.0],
        "a" => vec![7.0, 0.5],
        "b" => vec![-7.0, 0.5],
        "wide" => vec![1.0, 0.0, 0.0],
        _ => vec![0.0, 0.0],
    }
}

/// Mock Text Embeddings Inference server.
///
/// `boom` makes the call fail, `short` drops the last embedding of the batch and `slow` delays
/// the answer by two seconds.
async fn embed(Json(body): Json<Value>) -> Result<Json<Vec<Vec<f32>>>, StatusCode> {
    if body["normalize"] != Value::Bool(false) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let inputs: Vec<String> = body["inputs"]
        .as_array()
        .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?
        .iter()
        .filter_map(|i| i.as_str().map(String::from))
        .collect();

    if inputs.iter().any(|i| i == "slow") {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    if inputs.iter().any(|i| i == "boom") {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let mut embeddings: Vec<Vec<f32>> = inputs.iter().map(|i| vector(i)).collect();
    if inputs.iter().any(|i| i == "short") {
        embeddings.pop();
    }
    Ok(Json(embeddings))
}

pub async fn start_embedding_server() -> Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let app = Router::new()
        .route("/embed", post(embed))
        .route("/health", get(|| async {}));
    tokio::spawn(async move { axum::serve(listener, app).await });

    Ok(format!("http://{addr}"))
}

async fn check_health(port: u16, timeout: Duration) -> Result<()> {
    let addr = format!("http://127.0.0.1:{port}/health");
    let client = reqwest::ClientBuilder::new()
        .timeout(timeout)
        .build()
        .unwrap();

    let start = Instant::now();
    loop {
        if let Ok(response) = client.get(&addr).send().await {
            if response.status().is_success() {
                return Ok(());
            }
        }
        if start.elapsed() < timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;
        } else {
            anyhow::bail!("Server is not healthy");
        }
    }
}

pub async fn start_server(port: u16) -> Result<()> {
    start_server_with(port, Duration::from_secs(10), 4).await
}

pub async fn start_server_with(
    port: u16,
    embedding_timeout: Duration,
    max_concurrent_requests: usize,
) -> Result<()> {
    let embedding_url = start_embedding_server().await?;

    let server_task = tokio::spawn({
        run(
            embedding_url,
            EmbeddingApi::Tei,
            None,
            None,
            Some(2),
            false,
            Some(embedding_timeout),
            max_concurrent_requests,
            Some("127.0.0.1".to_string()),
            port,
            2_000_000,
            port + 1000,
            None,
        )
    });

    tokio::select! {
        err = server_task => err?,
        _ = check_health(port, Duration::from_secs(30)) => Ok(())
    }?;
    Ok(())
}
