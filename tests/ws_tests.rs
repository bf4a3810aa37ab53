mod support;

use std::net::SocketAddr;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use support::test_app;

async fn spawn_server() -> (SocketAddr, support::TestApp) {
    let app = test_app().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    (addr, app)
}

async fn next_event<S>(ws: &mut S) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no event within 5s")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_record_creation_is_pushed_then_confirmed() {
    let (addr, app) = spawn_server().await;
    let token = app.user_token("wsuser").await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/create-record"))
        .bearer_auth(&token)
        .json(&json!({
            "esgScore": 88,
            "creditAmount": 1500,
            "projectDescription": "Green Building",
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let created: Value = resp.json().await.unwrap();
    let tx_hash = created["txHash"].clone();

    let first = next_event(&mut ws).await;
    assert_eq!(first["event"], "recordCreated");
    assert_eq!(first["data"]["recordId"], 0);
    assert_eq!(first["data"]["user"], "wsuser");
    assert_eq!(first["data"]["status"], "pending");
    assert_eq!(first["data"]["txHash"], tx_hash);

    let second = next_event(&mut ws).await;
    assert_eq!(second["event"], "transactionUpdate");
    assert_eq!(second["data"]["status"], "confirmed");
    assert_eq!(second["data"]["esgScore"], 88);
    assert_eq!(second["data"]["txHash"], tx_hash);
}

#[tokio::test]
async fn test_every_client_receives_broadcasts() {
    let (addr, app) = spawn_server().await;
    let admin = app.admin_token().await;

    let (mut a, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let (mut b, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    assert_eq!(app.state.events.subscriber_count(), 2);

    let (status, _) = app
        .post(
            "/mint-tokens",
            Some(&admin),
            json!({ "recipient": "0x2222222222222222222222222222222222222222", "amount": 40 }),
        )
        .await;
    assert!(status.is_success());

    for ws in [&mut a, &mut b] {
        let event = next_event(ws).await;
        assert_eq!(event["event"], "tokensMinted");
        assert_eq!(event["data"]["amount"], "40");
        assert_eq!(event["data"]["mintedBy"], "admin");
    }
}
