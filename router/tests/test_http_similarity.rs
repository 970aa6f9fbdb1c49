mod common;

use crate::common::{start_server, Score, SnapshotResponse};
use anyhow::Result;
use serde_json::json;

#[tokio::test(flavor = "multi_thread")]
async fn test_similarity() -> Result<()> {
    start_server(8090).await?;
    let client = reqwest::Client::new();

    let res = client
        .post("http://127.0.0.1:8090/similarity")
        .json(&json!({"query": "cat", "documents": ["dog", "car", "cat"]}))
        .send()
        .await?;
    assert!(res.status().is_success());
    assert_eq!(res.headers()["x-compute-documents"], "3");
    assert_eq!(res.headers()["x-compute-characters"], "12");

    let response = res.json::<SnapshotResponse>().await?;
    assert_eq!(
        response.ranking(),
        vec![("cat", &Score(1.0)), ("dog", &Score(0.3)), ("car", &Score(0.1))]
    );

    // Equal scores keep the input order
    let response = client
        .post("http://127.0.0.1:8090/similarity")
        .json(&json!({"query": "x", "documents": ["a", "b"]}))
        .send()
        .await?
        .json::<SnapshotResponse>()
        .await?;
    assert_eq!(response.ranking(), vec![("a", &Score(0.5)), ("b", &Score(0.5))]);

    // Duplicates and empty documents are kept, the document list is sent in several batches
    let response = client
        .post("http://127.0.0.1:8090/compute_similarity")
        .json(&json!({"query": "cat", "documents": ["", "car", "cat", "car", "dog"]}))
        .send()
        .await?
        .json::<SnapshotResponse>()
        .await?;
    assert_eq!(
        response.ranking(),
        vec![
            ("cat", &Score(1.0)),
            ("dog", &Score(0.3)),
            ("car", &Score(0.1)),
            ("car", &Score(0.1)),
            ("", &Score(0.0))
        ]
    );

    let info = client
        .get("http://127.0.0.1:8090/info")
        .send()
        .await?
        .json::<serde_json::Value>()
        .await?;
    assert_eq!(info["embedding_api"], "tei");
    assert_eq!(info["embedding_batch_size"], 2);
    assert_eq!(info["max_concurrent_requests"], 4);

    for route in ["/health", "/ping", "/"] {
        let res = client.get(format!("http://127.0.0.1:8090{route}")).send().await?;
        assert!(res.status().is_success(), "{route}");
    }

    Ok(())
}
