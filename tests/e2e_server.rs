//! End-to-end server tests over a real TCP listener.
//!
//! Unlike the `oneshot` tests these go through `ConnectInfo`, so the peer
//! address is the client identity when no `X-Forwarded-For` is sent.

use std::time::Duration;

use serde_json::{json, Value};
use shieldgate::server::Server;
use shieldgate::Config;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Start a server on an ephemeral port. Returns base URL, master key, handle.
async fn start(config: Config) -> (String, String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Server::new(config);
    let key = server.master_key().to_string();
    let handle = tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    (format!("http://{addr}"), key, handle)
}

#[tokio::test]
async fn test_serves_through_gateway() {
    let (base, key, handle) = start(Config::default()).await;
    let client = reqwest::Client::new();

    let response = timeout(
        Duration::from_secs(5),
        client.get(format!("{base}/health")).send(),
    )
    .await
    .expect("Request timed out")
    .expect("Request failed");
    assert!(response.status().is_success());
    assert_eq!(response.headers()["server"], "ShieldGate");
    assert_eq!(
        response.headers()["strict-transport-security"],
        "max-age=31536000; includeSubDomains"
    );

    let response = client
        .post(format!("{base}/api/resource"))
        .bearer_auth(&key)
        .json(&json!({"title": "quarterly report"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let body: Value = client
        .get(format!("{base}/api/resource"))
        .header("x-api-key", &key)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["items"][0]["item"]["title"], "quarterly report");

    handle.abort();
}

#[tokio::test]
async fn test_peer_address_is_identity() {
    let (base, _key, handle) = start(Config::default()).await;
    let client = reqwest::Client::new();

    for _ in 0..5 {
        let response = client
            .get(format!("{base}/api/status"))
            .bearer_auth("not-a-real-key")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);
    }

    // Locked by peer address.
    let response = client
        .get(format!("{base}/api/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 429);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["category"], "security");

    handle.abort();
}

#[tokio::test]
async fn test_threat_rejected_over_wire() {
    let (base, key, handle) = start(Config::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/resource"))
        .bearer_auth(&key)
        .json(&json!({"path": "../../etc/passwd"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Request blocked by security policy");
    assert!(!body.to_string().contains("passwd"));

    handle.abort();
}
