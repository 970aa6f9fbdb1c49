mod common;

use crate::common::{start_server_with, SnapshotError, SnapshotResponse};
use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;

const URL: &str = "http://127.0.0.1:8092/similarity";

#[tokio::test(flavor = "multi_thread")]
async fn test_deadline_and_admission() -> Result<()> {
    // A single admitted request at a time, 500ms per embedding call
    start_server_with(8092, Duration::from_millis(500), 1).await?;
    let client = reqwest::Client::new();

    let slow = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .post(URL)
                .json(&json!({"query": "slow", "documents": ["dog"]}))
                .send()
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The slow request holds the only permit
    let res = client
        .post(URL)
        .json(&json!({"query": "cat", "documents": ["dog"]}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.json::<SnapshotError>().await?.error_type, "overloaded");

    // The embedding server answers after the deadline
    let res = slow.await??;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let err = res.json::<SnapshotError>().await?;
    assert_eq!(err.error_type, "embedding");
    assert!(err.error.contains("timed out"), "{}", err.error);

    // Permit released and provider free again
    let res = client
        .post(URL)
        .json(&json!({"query": "cat", "documents": ["dog"]}))
        .send()
        .await?;
    assert!(res.status().is_success());
    assert_eq!(res.json::<SnapshotResponse>().await?.best_matches.len(), 1);

    Ok(())
}
