//! HTTP API tests against a server on a free local port.

mod common;

use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use journal_harness::server::router;

use common::{services, ChunkReply, StubModel};

async fn start_server(tmp: &TempDir) -> String {
    let s = services(tmp, StubModel::new(ChunkReply::Whole), "fallback");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router(s)).await.unwrap();
    });
    let base = format!("http://127.0.0.1:{}", port);
    wait_for_server(&base).await;
    base
}

async fn wait_for_server(base: &str) {
    let client = reqwest::Client::new();
    let url = format!("{}/health", base);
    for _ in 0..50 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn wait_until_processed(client: &reqwest::Client, base: &str, date: &str) -> Value {
    for _ in 0..50 {
        let detail: Value = client
            .get(format!("{}/entries/{}", base, date))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if detail["enrichment"]["state"] == "processed" {
            return detail;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("entry {} was not processed in time", date);
}

#[tokio::test]
async fn test_health() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;

    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_save_then_read_search_and_chat() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/entries", base))
        .json(&json!({"date": "2025-12-02", "text": "Comida con la familia, todos contentos."}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "pending");
    assert_eq!(body["entry_id"], "entry_2025_12_02");

    let detail = wait_until_processed(&client, &base, "2025-12-02").await;
    assert_eq!(detail["enrichment"]["chunks"].as_array().unwrap().len(), 1);
    assert_eq!(detail["enrichment"]["analysis"]["topics"][0], "salud");

    let dates: Value = client
        .get(format!("{}/entries", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(dates["dates"], json!(["2025-12-02"]));

    let results: Value = client
        .post(format!("{}/search", base))
        .json(&json!({"query": "familia", "k": 3}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results["results"][0]["rank"], 1);
    assert_eq!(results["results"][0]["chunk_id"], "entry_2025_12_02_chunk_0");

    let answer: Value = client
        .post(format!("{}/chat", base))
        .json(&json!({
            "question": "¿cómo está mi familia?",
            "history": [{"role": "user", "content": "hola"}, {"role": "assistant", "content": "hola"}]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(answer["answer"], "respuesta con 4 mensajes");
    assert_eq!(answer["sources"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_error_contract() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/entries/2020-01-01", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .get(format!("{}/entries/01-01-2020", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/entries", base))
        .json(&json!({"text": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/search", base))
        .json(&json!({"query": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/chat", base))
        .json(&json!({"question": "  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "validation_failure");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("question must not be empty"));
}

#[tokio::test]
async fn test_search_before_any_entry_is_empty() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;

    let results: Value = reqwest::Client::new()
        .post(format!("{}/search", base))
        .json(&json!({"query": "familia"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results["results"], json!([]));
}
